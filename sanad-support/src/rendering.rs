//! Text rendering utilities for resolution diagnostics.
//!
//! Provides helpers to format dependency paths, type names,
//! and "did you mean?" hints in error output.

/// Renders a dependency path on one line.
///
/// # Examples
/// ```
/// use sanad_support::rendering::render_path;
///
/// let path = vec!["UserService", "UserRepo", "Database"];
/// assert_eq!(render_path(&path), "UserService → UserRepo → Database");
/// ```
pub fn render_path(path: &[impl AsRef<str>]) -> String {
    path.iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Renders a dependency path top-down with lifetime annotations.
///
/// ```text
/// [Transient]           UserService
///                         ↓
/// [ContainerControlled] Database  (name: "primary")
/// ```
pub fn render_path_vertical(steps: &[PathLine]) -> String {
    let mut result = String::new();
    let width = steps.iter().map(|s| s.lifetime.len()).max().unwrap_or(0);

    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            result.push_str(&" ".repeat(width + 3));
            result.push_str("↓\n");
        }

        result.push_str(&format!("[{:<width$}] {}", step.lifetime, step.type_name));

        if let Some(ref name) = step.name {
            result.push_str(&format!("  (name: {name:?})"));
        }

        result.push('\n');
    }

    result
}

/// One line of a vertically rendered dependency path.
#[derive(Debug, Clone)]
pub struct PathLine {
    /// Shortened type name
    pub type_name: String,
    /// Lifetime label, or a placeholder when nothing was registered
    pub lifetime: String,
    /// Registration name, if not the default
    pub name: Option<String>,
}

/// Shortens a fully qualified type name for display.
///
/// ```
/// use sanad_support::rendering::shorten_type_name;
///
/// assert_eq!(shorten_type_name("my_app::services::user::UserService"), "UserService");
/// assert_eq!(shorten_type_name("alloc::sync::Arc<dyn my_app::traits::Logger>"), "Arc<dyn Logger>");
/// ```
pub fn shorten_type_name(full_name: &str) -> String {
    let mut result = String::with_capacity(full_name.len());
    let mut chars = full_name.chars().peekable();
    let mut segment = String::new();

    while let Some(ch) = chars.next() {
        match ch {
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                segment.clear();
            }
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                result.push_str(&segment);
                result.push(ch);
                segment.clear();
            }
            _ => segment.push(ch),
        }
    }

    result.push_str(&segment);
    result
}

/// Suggests registered type names that look like `requested`.
///
/// Scores substring matches of the full name highest, then matches of the
/// shortened name, then a common prefix of at least three characters.
pub fn suggest_similar(requested: &str, available: &[&str], max_suggestions: usize) -> Vec<String> {
    let requested_lower = requested.to_lowercase();
    let requested_short = shorten_type_name(requested).to_lowercase();

    let mut scored: Vec<(&str, usize)> = available
        .iter()
        .filter(|&&name| name != requested)
        .filter_map(|&name| {
            let name_lower = name.to_lowercase();
            let name_short = shorten_type_name(name).to_lowercase();

            if name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower) {
                return Some((name, 100));
            }

            if name_short.contains(&requested_short) || requested_short.contains(&name_short) {
                return Some((name, 80));
            }

            let common = name_short
                .chars()
                .zip(requested_short.chars())
                .take_while(|(a, b)| a == b)
                .count();

            (common >= 3).then_some((name, common * 10))
        })
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    scored.dedup_by(|a, b| a.0 == b.0);
    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(name, _)| name.to_string())
        .collect()
}
