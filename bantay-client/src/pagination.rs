/// Page through a list in fixed-size pages. Pages are 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paginator {
    page_size: usize,
    current_page: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub total_pages: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_pages(&self, len: usize) -> usize {
        len.div_ceil(self.page_size)
    }

    /// The current page, pulled back if the list shrank underneath it.
    pub fn current_page(&self, len: usize) -> usize {
        self.current_page.min(self.total_pages(len)).max(1)
    }

    pub fn next(&mut self, len: usize) {
        self.current_page = (self.current_page(len) + 1).min(self.total_pages(len).max(1));
    }

    pub fn previous(&mut self, len: usize) {
        self.current_page = self.current_page(len).saturating_sub(1).max(1);
    }

    pub fn reset(&mut self) {
        self.current_page = 1;
    }

    pub fn page<T: Clone>(&self, items: &[T]) -> Page<T> {
        let current_page = self.current_page(items.len());
        let start = (current_page - 1) * self.page_size;
        Page {
            items: items
                .iter()
                .skip(start)
                .take(self.page_size)
                .cloned()
                .collect(),
            current_page,
            total_pages: self.total_pages(items.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_of_five() {
        let items: Vec<u32> = (1..=12).collect();
        let mut paginator = Paginator::default();

        let page = paginator.page(&items);
        assert_eq!(page.items, vec![1, 2, 3, 4, 5]);
        assert_eq!(page.total_pages, 3);

        paginator.next(items.len());
        paginator.next(items.len());
        paginator.next(items.len());
        let page = paginator.page(&items);
        assert_eq!(page.current_page, 3);
        assert_eq!(page.items, vec![11, 12]);

        paginator.previous(items.len());
        paginator.previous(items.len());
        paginator.previous(items.len());
        assert_eq!(paginator.current_page(items.len()), 1);
    }

    #[test]
    fn test_empty_list_stays_on_page_one() {
        let mut paginator = Paginator::new(5);
        paginator.next(0);
        let page = paginator.page::<u32>(&[]);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.total_pages, 0);
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_list_shrinking_pulls_page_back() {
        let mut paginator = Paginator::new(5);
        paginator.next(10);
        assert_eq!(paginator.current_page(10), 2);
        // Deletes brought the list down to one page.
        let page = paginator.page(&[1, 2, 3]);
        assert_eq!(page.current_page, 1);
        assert_eq!(page.items, vec![1, 2, 3]);
    }
}
