//! Query tokenization and weight classification for the Discovery Engine's
//! lexical reranker.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Action,
    Object,
    Modifier,
    Scope,
    Other,
}

impl TokenClass {
    /// `(name_weight, description_weight)` for a token of this class.
    pub fn weights(self) -> (f32, f32) {
        match self {
            TokenClass::Action => (0.7, 0.35),
            TokenClass::Object => (0.2, 0.1),
            TokenClass::Modifier => (0.05, 0.025),
            TokenClass::Scope => (0.03, 0.015),
            TokenClass::Other => (0.15, 0.075),
        }
    }
}

const ACTIONS: &[&str] = &[
    "save", "write", "delete", "read", "create", "add", "remove", "update", "get", "list",
    "view", "edit", "search", "send", "fetch", "query", "build", "run", "execute",
];
const OBJECTS: &[&str] = &[
    "file", "document", "database", "user", "record", "message", "folder", "directory",
    "table", "row", "image", "email", "task", "project", "repo",
];
const MODIFIERS: &[&str] = &["text", "json", "large", "small", "csv", "binary", "remote", "local"];
const SCOPES: &[&str] = &["all", "multiple", "recursive", "batch", "every", "entire"];

/// Classifies a single already-lowercased token.
pub fn classify(token: &str) -> TokenClass {
    if ACTIONS.contains(&token) {
        TokenClass::Action
    } else if OBJECTS.contains(&token) {
        TokenClass::Object
    } else if MODIFIERS.contains(&token) {
        TokenClass::Modifier
    } else if SCOPES.contains(&token) {
        TokenClass::Scope
    } else {
        TokenClass::Other
    }
}

/// Tokenizes on whitespace/punctuation, lowercases, and discards tokens of
/// length ≤ 2.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

/// The dominant `Action` token in the query, if any — the first action
/// token encountered, used by the intent-penalty check.
pub fn dominant_action(tokens: &[String]) -> Option<&str> {
    tokens
        .iter()
        .find(|t| classify(t) == TokenClass::Action)
        .map(|s| s.as_str())
}
