/// Scroll position of the pane transcript view, counted in lines up from the
/// bottom so new output stays in view by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptView {
    pub scroll_offset: u16,
}

impl TranscriptView {
    const LINE_STEP: u16 = 3;
    const PAGE_STEP: u16 = 15;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(Self::LINE_STEP);
    }

    pub fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(Self::LINE_STEP);
    }

    pub fn scroll_page_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(Self::PAGE_STEP);
    }

    pub fn scroll_page_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(Self::PAGE_STEP);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_offset = u16::MAX;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.scroll_offset = 0;
    }

    /// Row to pass to `Paragraph::scroll` for `total_lines` of content in a
    /// viewport `height` rows tall.
    pub fn scroll_row(&self, total_lines: u16, height: u16) -> u16 {
        let max_offset = total_lines.saturating_sub(height);
        max_offset.saturating_sub(self.scroll_offset.min(max_offset))
    }
}

pub(crate) fn count_lines_u16(content: &str) -> u16 {
    content.lines().count().min(u16::MAX as usize) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_up_down() {
        let mut v = TranscriptView::new();
        v.scroll_page_up();
        assert_eq!(v.scroll_offset, 15);
        v.scroll_page_up();
        assert_eq!(v.scroll_offset, 30);
        v.scroll_page_down();
        assert_eq!(v.scroll_offset, 15);
        v.scroll_page_down();
        assert_eq!(v.scroll_offset, 0);
        v.scroll_page_down(); // saturates at 0
        assert_eq!(v.scroll_offset, 0);
    }

    #[test]
    fn scroll_to_top_bottom() {
        let mut v = TranscriptView::new();
        v.scroll_to_top();
        assert_eq!(v.scroll_offset, u16::MAX);
        v.scroll_to_bottom();
        assert_eq!(v.scroll_offset, 0);
    }

    #[test]
    fn scroll_row_pins_to_bottom_by_default() {
        let v = TranscriptView::new();
        assert_eq!(v.scroll_row(100, 20), 80);
        assert_eq!(v.scroll_row(10, 20), 0);
    }

    #[test]
    fn scroll_row_clamps_past_top() {
        let mut v = TranscriptView::new();
        v.scroll_to_top();
        assert_eq!(v.scroll_row(100, 20), 0);
        v.scroll_to_bottom();
        v.scroll_up();
        assert_eq!(v.scroll_row(100, 20), 77);
    }

    #[test]
    fn counts_lines() {
        assert_eq!(count_lines_u16(""), 0);
        assert_eq!(count_lines_u16("a\nb\n"), 2);
    }
}
