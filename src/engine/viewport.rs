/// What caused the message list to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// The local user's own send; always scrolls to the newest message.
    OwnSend,
    /// Anything else: fetched history, refreshes.
    Incoming,
}

/// Tracks whether the reader sits near the bottom of the message list.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    near_bottom: bool,
    threshold_px: f32,
}

impl Viewport {
    pub fn new(threshold_px: f32) -> Self {
        Viewport {
            near_bottom: true,
            threshold_px: threshold_px.max(0.0),
        }
    }

    pub fn on_scroll(&mut self, offset: f32, viewport_height: f32, content_height: f32) {
        let distance = content_height - (offset + viewport_height);
        self.near_bottom = distance <= self.threshold_px;
    }

    pub fn is_near_bottom(&self) -> bool {
        self.near_bottom
    }

    /// A freshly opened conversation starts at its newest message.
    pub fn reset(&mut self) {
        self.near_bottom = true;
    }

    pub fn should_autoscroll(&self, source: UpdateSource) -> bool {
        source == UpdateSource::OwnSend || self.near_bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_bottom_within_threshold() {
        let mut vp = Viewport::new(80.0);
        vp.on_scroll(900.0, 400.0, 1350.0);
        assert!(vp.is_near_bottom());
        vp.on_scroll(800.0, 400.0, 1350.0);
        assert!(!vp.is_near_bottom());
    }

    #[test]
    fn scrolled_up_only_follows_own_sends() {
        let mut vp = Viewport::new(80.0);
        vp.on_scroll(0.0, 400.0, 2000.0);
        assert!(!vp.should_autoscroll(UpdateSource::Incoming));
        assert!(vp.should_autoscroll(UpdateSource::OwnSend));

        vp.reset();
        assert!(vp.should_autoscroll(UpdateSource::Incoming));
    }

    #[test]
    fn short_content_counts_as_bottom() {
        let mut vp = Viewport::new(80.0);
        vp.on_scroll(0.0, 600.0, 200.0);
        assert!(vp.is_near_bottom());
    }
}
