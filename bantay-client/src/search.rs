pub const PREVIEW_LENGTH: usize = 150;

pub trait Searchable {
    fn title(&self) -> &str;
    fn content(&self) -> &str;
}

/// Case-insensitive substring match on title or content. An empty query matches everything.
pub fn matches<T: Searchable + ?Sized>(item: &T, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    item.title().to_lowercase().contains(&query) || item.content().to_lowercase().contains(&query)
}

pub fn filter<'a, T: Searchable + Clone + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    query: &str,
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| matches(*item, query))
        .cloned()
        .collect()
}

/// Cuts `content` to at most `max_chars` characters, marking the cut with `...`.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
