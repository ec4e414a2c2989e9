//! Suggested opening questions shown on each chatbot.

pub const DEFAULT_QUICK_PROMPTS: [&str; 3] = [
    "Har I ledige lejeboliger i København næste måned?",
    "Kan man få en bolig med altan og 3 værelser?",
    "Hvad er depositum og overtagelsesdato på den seneste bolig?",
];

/// Normalize user-supplied prompts to exactly three trimmed, non-empty strings.
///
/// Missing or empty input means "use the defaults". Blank entries are dropped
/// and the remainder is backfilled from [`DEFAULT_QUICK_PROMPTS`] in order.
pub fn normalize_quick_prompts(input: Option<&[String]>) -> [String; 3] {
    let mut filled: Vec<String> = match input {
        Some(prompts) if !prompts.is_empty() => prompts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        _ => DEFAULT_QUICK_PROMPTS.iter().map(|p| p.to_string()).collect(),
    };

    for default in DEFAULT_QUICK_PROMPTS {
        if filled.len() >= 3 {
            break;
        }
        filled.push(default.to_string());
    }

    let mut it = filled.into_iter();
    // The loop above guarantees at least three entries.
    [
        it.next().unwrap_or_default(),
        it.next().unwrap_or_default(),
        it.next().unwrap_or_default(),
    ]
}
