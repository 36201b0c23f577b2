use std::time::Duration;

/// Reveals a page one character at a time at a fixed interval.
#[derive(Debug, Clone)]
pub struct Typewriter {
    text: String,
    total: usize,
    cursor: usize,
    interval: Duration,
    carry: Duration,
}

impl Typewriter {
    pub fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            total: 0,
            cursor: 0,
            interval,
            carry: Duration::ZERO,
        }
    }

    /// Replace the page and start revealing from the beginning.
    pub fn load(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.total = self.text.chars().count();
        self.cursor = 0;
        self.carry = Duration::ZERO;
        if self.interval.is_zero() {
            self.cursor = self.total;
        }
    }

    /// Advance by `dt` of wall-clock time. Returns true if more text became visible.
    pub fn tick(&mut self, dt: Duration) -> bool {
        if self.is_complete() {
            return false;
        }
        self.carry += dt;
        let steps = (self.carry.as_nanos() / self.interval.as_nanos()) as usize;
        if steps == 0 {
            return false;
        }
        self.carry -= self.interval * steps as u32;
        self.cursor = (self.cursor + steps).min(self.total);
        if self.is_complete() {
            self.carry = Duration::ZERO;
        }
        true
    }

    pub fn skip(&mut self) {
        self.cursor = self.total;
        self.carry = Duration::ZERO;
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn page(&self) -> &str {
        &self.text
    }

    pub fn visible(&self) -> &str {
        match self.text.char_indices().nth(self.cursor) {
            Some((byte, _)) => &self.text[..byte],
            None => &self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveals_at_fixed_rate() {
        let mut tw = Typewriter::new(Duration::from_millis(30));
        tw.load("héllo");

        assert!(!tw.tick(Duration::from_millis(20)));
        assert_eq!(tw.visible(), "");
        assert!(tw.tick(Duration::from_millis(20)));
        assert_eq!(tw.visible(), "h");
        tw.tick(Duration::from_millis(50));
        assert_eq!(tw.visible(), "hél");
        tw.tick(Duration::from_secs(5));
        assert!(tw.is_complete());
        assert_eq!(tw.visible(), "héllo");
    }

    #[test]
    fn skip_shows_whole_page() {
        let mut tw = Typewriter::new(Duration::from_millis(30));
        tw.load("abc");
        tw.skip();
        assert!(tw.is_complete());
        assert_eq!(tw.visible(), "abc");
        assert_eq!(tw.cursor(), 3);

        tw.load("next");
        assert_eq!(tw.cursor(), 0);
    }

    #[test]
    fn zero_interval_is_instant() {
        let mut tw = Typewriter::new(Duration::ZERO);
        tw.load("now");
        assert!(tw.is_complete());
        assert!(!tw.tick(Duration::from_millis(1)));
    }
}
