//! View state - pure data describing what the window shows.
//!
//! Kept free of windowing types so the loading progress and title logic can
//! be tested without a display.

use crate::render::RenderResult;
use crate::upload::StrategyKind;

/// Loading progress as seen by the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub textured: usize,
    pub tiles: usize,
    pub batches_in_flight: usize,
    pub decode_failures: usize,
}

impl Progress {
    pub fn is_loading(&self) -> bool {
        self.batches_in_flight > 0
    }
}

#[derive(Debug)]
pub struct ViewState {
    /// Window dimensions
    pub window_width: u32,
    pub window_height: u32,
    /// Whether a render is needed
    pub needs_render: bool,
    pub strategy: StrategyKind,
    pub progress: Progress,
    /// Tiles still drawn as placeholders in the last frame
    pub last_placeholders: Option<usize>,
}

impl ViewState {
    pub fn new(window_width: u32, window_height: u32, strategy: StrategyKind) -> Self {
        Self {
            window_width,
            window_height,
            needs_render: true,
            strategy,
            progress: Progress::default(),
            last_placeholders: None,
        }
    }

    /// Update window size
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.window_width = width;
            self.window_height = height;
            self.needs_render = true;
        }
    }

    /// Record new progress, requesting a render if anything visible changed.
    /// Returns whether the title needs refreshing.
    pub fn update_progress(&mut self, progress: Progress) -> bool {
        if progress == self.progress {
            return false;
        }
        if progress.textured != self.progress.textured || progress.tiles != self.progress.tiles {
            self.needs_render = true;
        }
        self.progress = progress;
        true
    }

    pub fn set_strategy(&mut self, strategy: StrategyKind) {
        self.strategy = strategy;
    }

    /// Mark render complete
    pub fn render_complete(&mut self, result: RenderResult) {
        self.needs_render = false;
        self.last_placeholders = Some(result.placeholders);
    }

    /// Get formatted title string
    pub fn title(&self) -> String {
        let p = &self.progress;
        if p.tiles == 0 {
            return "Texfetch - Nothing to load".to_string();
        }

        let status = if p.is_loading() {
            " [loading...]"
        } else if p.textured < p.tiles {
            " [incomplete]"
        } else {
            ""
        };
        let failures = match p.decode_failures {
            0 => String::new(),
            n => format!(" - {} failed", n),
        };

        format!(
            "Texfetch - {}/{} ({}){}{}",
            p.textured,
            p.tiles,
            self.strategy.label(),
            failures,
            status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(textured: usize, tiles: usize, in_flight: usize) -> Progress {
        Progress {
            textured,
            tiles,
            batches_in_flight: in_flight,
            decode_failures: 0,
        }
    }

    #[test]
    fn test_title() {
        let mut state = ViewState::new(800, 600, StrategyKind::Serialized);
        assert_eq!(state.title(), "Texfetch - Nothing to load");

        state.update_progress(progress(2, 8, 1));
        assert_eq!(state.title(), "Texfetch - 2/8 (serialized) [loading...]");

        state.set_strategy(StrategyKind::SharedContext);
        state.update_progress(Progress {
            decode_failures: 1,
            ..progress(7, 8, 0)
        });
        assert_eq!(
            state.title(),
            "Texfetch - 7/8 (shared-context) - 1 failed [incomplete]"
        );

        state.update_progress(progress(8, 8, 0));
        assert_eq!(state.title(), "Texfetch - 8/8 (shared-context)");
    }

    #[test]
    fn test_progress_triggers_render() {
        let mut state = ViewState::new(800, 600, StrategyKind::Serialized);
        state.render_complete(RenderResult::default());
        assert!(!state.needs_render);

        // Same progress: nothing to do
        assert!(!state.update_progress(Progress::default()));

        // Only the batch count changed: title, but no redraw
        assert!(state.update_progress(progress(0, 0, 1)));
        assert!(!state.needs_render);

        assert!(state.update_progress(progress(1, 4, 1)));
        assert!(state.needs_render);
    }

    #[test]
    fn test_resize() {
        let mut state = ViewState::new(800, 600, StrategyKind::Serialized);
        state.render_complete(RenderResult { drawn: 0, placeholders: 3 });
        assert_eq!(state.last_placeholders, Some(3));

        state.resize(0, 100);
        assert!(!state.needs_render);

        state.resize(1024, 768);
        assert_eq!((state.window_width, state.window_height), (1024, 768));
        assert!(state.needs_render);
    }
}
