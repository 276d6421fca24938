//! Static domain-keyword ⇒ related-terms mapping consulted by the Semantic
//! Index: a candidate whose `sourceText` matches a domain's expanded term
//! set receives an additive boost, on top of cosine similarity.

const DOMAIN_BOOST: f32 = 0.05;

struct Domain {
    keyword: &'static str,
    terms: &'static [&'static str],
}

const DOMAINS: &[Domain] = &[
    Domain {
        keyword: "payment",
        terms: &["stripe", "checkout", "refund", "invoice", "charge", "subscription"],
    },
    Domain {
        keyword: "filesystem",
        terms: &["read", "write", "directory", "path", "folder", "file"],
    },
    Domain {
        keyword: "database",
        terms: &["sql", "query", "table", "row", "schema", "migration"],
    },
    Domain {
        keyword: "messaging",
        terms: &["slack", "email", "notify", "webhook", "message", "channel"],
    },
    Domain {
        keyword: "version-control",
        terms: &["git", "commit", "branch", "pull-request", "merge", "repo"],
    },
    Domain {
        keyword: "search",
        terms: &["index", "query", "rank", "lookup", "find"],
    },
];

/// Additive boost for `source_text` given the query, summed across every
/// domain whose keyword appears in the query and whose related terms also
/// appear in `source_text`.
pub fn boost_for(query: &str, source_text: &str) -> f32 {
    let query = query.to_lowercase();
    let source_text = source_text.to_lowercase();

    let mut boost = 0.0;
    for domain in DOMAINS {
        if !query.contains(domain.keyword) {
            continue;
        }
        if domain.terms.iter().any(|term| source_text.contains(term)) {
            boost += DOMAIN_BOOST;
        }
    }
    boost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boosts_matching_domain() {
        let boost = boost_for("handle a payment refund", "process_refund. Issues a stripe refund");
        assert!(boost > 0.0);
    }

    #[test]
    fn no_boost_for_unrelated_domain() {
        let boost = boost_for("launch a rocket", "read_file. Reads a file from disk");
        assert_eq!(boost, 0.0);
    }
}
