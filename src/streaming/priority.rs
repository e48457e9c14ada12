use std::fmt;

/// Priority of a path, used to weight credit between inbound paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum StreamPriority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl StreamPriority {
    pub const NORMAL_WEIGHT: usize = 4;

    /// Relative share of credit a path with this priority receives per round.
    pub const fn weight(self) -> usize {
        match self {
            StreamPriority::VeryLow => 1,
            StreamPriority::Low => 2,
            StreamPriority::Normal => Self::NORMAL_WEIGHT,
            StreamPriority::High => 8,
            StreamPriority::VeryHigh => 16,
        }
    }

    /// Scales a credit limit configured for normal priority to this priority.
    pub fn scale(self, normal_limit: usize) -> usize {
        (normal_limit * self.weight() / Self::NORMAL_WEIGHT).max(1)
    }
}

impl fmt::Display for StreamPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamPriority::VeryLow => "very_low",
            StreamPriority::Low => "low",
            StreamPriority::Normal => "normal",
            StreamPriority::High => "high",
            StreamPriority::VeryHigh => "very_high",
        };
        f.write_str(name)
    }
}
