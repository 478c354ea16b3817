/// Maximum number of topics kept per summary.
pub const MAX_TOPICS: usize = 5;

/// Technology terms looked for in every summary, case-insensitively.
pub const TECH_KEYWORDS: [&str; 16] = [
    "Python",
    "FastAPI",
    "React",
    "JavaScript",
    "TypeScript",
    "Docker",
    "AWS",
    "API",
    "database",
    "frontend",
    "backend",
    "authentication",
    "deployment",
    "testing",
    "AI",
    "ML",
];

/// Whole words made of one ASCII capital followed by ASCII lowercase letters,
/// e.g. `Python` or `Berlin` but not `AWS`, `McDonald` or `Python3`.
fn capitalized_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| {
            let mut chars = word.chars();
            chars.next().is_some_and(|c| c.is_ascii_uppercase())
                && word.len() > 1
                && chars.all(|c| c.is_ascii_lowercase())
        })
}

/// Key topics of a summary: capitalised words, then technology terms,
/// deduplicated in first-seen order and capped at [`MAX_TOPICS`].
pub fn extract_topics(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let keywords = TECH_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lowered.contains(&kw.to_lowercase()));

    let mut topics: Vec<String> = Vec::new();
    for topic in capitalized_words(text).chain(keywords) {
        if topics.len() == MAX_TOPICS {
            break;
        }
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }
    topics
}
