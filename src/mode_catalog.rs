//! Mode catalog: the closed set of display modes a sink can report and
//! their desirability ranking.
//!
//! Modes are identified on the wire by their CEA-861 video identification
//! code (VIC). Ranking is by category only, so several variants of the same
//! category (for example every 1080p refresh rate) tie on rank.

use crate::error::LinkError;
use std::fmt;

/// A display mode the link hardware can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayMode {
    /// 640x480p60 4:3
    Vga480p60,
    /// 720x480p60 4:3
    Sd480p60,
    /// 720x480p60 16:9
    Sd480p60Wide,
    /// 1280x720p60 16:9
    Hd720p60,
    /// 1920x1080i60 16:9
    Hd1080i60,
    /// 1440x480i60 4:3
    Sd480i60,
    /// 1440x480i60 16:9
    Sd480i60Wide,
    /// 1920x1080p60 16:9
    Hd1080p60,
    /// 720x576p50 4:3
    Sd576p50,
    /// 720x576p50 16:9
    Sd576p50Wide,
    /// 1280x720p50 16:9
    Hd720p50,
    /// 1440x576i50 4:3
    Sd576i50,
    /// 1440x576i50 16:9
    Sd576i50Wide,
    /// 1920x1080p50 16:9
    Hd1080p50,
    /// 1920x1080p24 16:9
    Hd1080p24,
    /// 1920x1080p25 16:9
    Hd1080p25,
    /// 1920x1080p30 16:9
    Hd1080p30,
}

/// Picture aspect ratio of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Standard,
    Wide,
}

impl AspectRatio {
    fn label(&self) -> &'static str {
        match self {
            AspectRatio::Standard => "4_3",
            AspectRatio::Wide => "16_9",
        }
    }
}

/// Timing description of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub interlaced: bool,
    pub aspect: AspectRatio,
}

/// Ranking categories, declared from least to most desirable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModeCategory {
    Interlaced480,
    Interlaced576,
    ProgressiveVga,
    Progressive480,
    Progressive576,
    Interlaced1080,
    Progressive720,
    Progressive1080,
}

impl DisplayMode {
    /// Every mode in the catalog, in VIC order.
    #[cfg(test)]
    pub const ALL: [DisplayMode; 17] = [
        DisplayMode::Vga480p60,
        DisplayMode::Sd480p60,
        DisplayMode::Sd480p60Wide,
        DisplayMode::Hd720p60,
        DisplayMode::Hd1080i60,
        DisplayMode::Sd480i60,
        DisplayMode::Sd480i60Wide,
        DisplayMode::Hd1080p60,
        DisplayMode::Sd576p50,
        DisplayMode::Sd576p50Wide,
        DisplayMode::Hd720p50,
        DisplayMode::Sd576i50,
        DisplayMode::Sd576i50Wide,
        DisplayMode::Hd1080p50,
        DisplayMode::Hd1080p24,
        DisplayMode::Hd1080p25,
        DisplayMode::Hd1080p30,
    ];

    /// Convert a raw video identification code into a catalog mode.
    ///
    /// Codes outside the catalog are rejected with `UnrecognizedMode`.
    pub fn from_vic(code: u32) -> Result<Self, LinkError> {
        let mode = match code {
            1 => DisplayMode::Vga480p60,
            2 => DisplayMode::Sd480p60,
            3 => DisplayMode::Sd480p60Wide,
            4 => DisplayMode::Hd720p60,
            5 => DisplayMode::Hd1080i60,
            6 => DisplayMode::Sd480i60,
            7 => DisplayMode::Sd480i60Wide,
            16 => DisplayMode::Hd1080p60,
            17 => DisplayMode::Sd576p50,
            18 => DisplayMode::Sd576p50Wide,
            19 => DisplayMode::Hd720p50,
            21 => DisplayMode::Sd576i50,
            22 => DisplayMode::Sd576i50Wide,
            31 => DisplayMode::Hd1080p50,
            32 => DisplayMode::Hd1080p24,
            33 => DisplayMode::Hd1080p25,
            34 => DisplayMode::Hd1080p30,
            other => return Err(LinkError::UnrecognizedMode(other)),
        };
        Ok(mode)
    }

    /// The video identification code reported by the sink.
    pub fn vic(&self) -> u32 {
        match self {
            DisplayMode::Vga480p60 => 1,
            DisplayMode::Sd480p60 => 2,
            DisplayMode::Sd480p60Wide => 3,
            DisplayMode::Hd720p60 => 4,
            DisplayMode::Hd1080i60 => 5,
            DisplayMode::Sd480i60 => 6,
            DisplayMode::Sd480i60Wide => 7,
            DisplayMode::Hd1080p60 => 16,
            DisplayMode::Sd576p50 => 17,
            DisplayMode::Sd576p50Wide => 18,
            DisplayMode::Hd720p50 => 19,
            DisplayMode::Sd576i50 => 21,
            DisplayMode::Sd576i50Wide => 22,
            DisplayMode::Hd1080p50 => 31,
            DisplayMode::Hd1080p24 => 32,
            DisplayMode::Hd1080p25 => 33,
            DisplayMode::Hd1080p30 => 34,
        }
    }

    pub fn info(&self) -> ModeInfo {
        use AspectRatio::{Standard, Wide};

        let (width, height, refresh_hz, interlaced, aspect) = match self {
            DisplayMode::Vga480p60 => (640, 480, 60, false, Standard),
            DisplayMode::Sd480p60 => (720, 480, 60, false, Standard),
            DisplayMode::Sd480p60Wide => (720, 480, 60, false, Wide),
            DisplayMode::Hd720p60 => (1280, 720, 60, false, Wide),
            DisplayMode::Hd1080i60 => (1920, 1080, 60, true, Wide),
            DisplayMode::Sd480i60 => (1440, 480, 60, true, Standard),
            DisplayMode::Sd480i60Wide => (1440, 480, 60, true, Wide),
            DisplayMode::Hd1080p60 => (1920, 1080, 60, false, Wide),
            DisplayMode::Sd576p50 => (720, 576, 50, false, Standard),
            DisplayMode::Sd576p50Wide => (720, 576, 50, false, Wide),
            DisplayMode::Hd720p50 => (1280, 720, 50, false, Wide),
            DisplayMode::Sd576i50 => (1440, 576, 50, true, Standard),
            DisplayMode::Sd576i50Wide => (1440, 576, 50, true, Wide),
            DisplayMode::Hd1080p50 => (1920, 1080, 50, false, Wide),
            DisplayMode::Hd1080p24 => (1920, 1080, 24, false, Wide),
            DisplayMode::Hd1080p25 => (1920, 1080, 25, false, Wide),
            DisplayMode::Hd1080p30 => (1920, 1080, 30, false, Wide),
        };

        ModeInfo {
            width,
            height,
            refresh_hz,
            interlaced,
            aspect,
        }
    }

    pub fn category(&self) -> ModeCategory {
        match self {
            DisplayMode::Sd480i60 | DisplayMode::Sd480i60Wide => ModeCategory::Interlaced480,
            DisplayMode::Sd576i50 | DisplayMode::Sd576i50Wide => ModeCategory::Interlaced576,
            DisplayMode::Vga480p60 => ModeCategory::ProgressiveVga,
            DisplayMode::Sd480p60 | DisplayMode::Sd480p60Wide => ModeCategory::Progressive480,
            DisplayMode::Sd576p50 | DisplayMode::Sd576p50Wide => ModeCategory::Progressive576,
            DisplayMode::Hd1080i60 => ModeCategory::Interlaced1080,
            DisplayMode::Hd720p60 | DisplayMode::Hd720p50 => ModeCategory::Progressive720,
            DisplayMode::Hd1080p60
            | DisplayMode::Hd1080p50
            | DisplayMode::Hd1080p24
            | DisplayMode::Hd1080p25
            | DisplayMode::Hd1080p30 => ModeCategory::Progressive1080,
        }
    }

    /// Priority rank, 1 (least desirable fallback) to 8 (most desirable).
    pub fn rank(&self) -> u8 {
        self.category() as u8 + 1
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        write!(
            f,
            "{}x{}{}{}_{}",
            info.width,
            info.height,
            if info.interlaced { 'i' } else { 'p' },
            info.refresh_hz,
            info.aspect.label()
        )
    }
}

/// Pick the most desirable mode of a reported set.
///
/// The first mode of the highest rank wins, so the result only depends on
/// the reported order. An empty set is an error, never a guessed default.
pub fn select_best(modes: &[DisplayMode]) -> Result<DisplayMode, LinkError> {
    let mut best: Option<DisplayMode> = None;

    for &mode in modes {
        match best {
            Some(current) if mode.rank() <= current.rank() => {}
            _ => best = Some(mode),
        }
    }

    best.ok_or(LinkError::EmptyModeSet)
}

/// VIC codes of a mode set, preserving order.
pub fn to_vics(modes: &[DisplayMode]) -> Vec<u32> {
    modes.iter().map(DisplayMode::vic).collect()
}
