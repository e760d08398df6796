//! Compass directions, direction groups, signal phases and junction layout.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Approach direction into a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::North => 0,
            Self::South => 1,
            Self::East => 2,
            Self::West => 3,
        }
    }

    pub fn group(self) -> DirectionGroup {
        match self {
            Self::North | Self::South => DirectionGroup::NorthSouth,
            Self::East | Self::West => DirectionGroup::EastWest,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::North => "North",
            Self::South => "South",
            Self::East => "East",
            Self::West => "West",
        }
    }
}

/// Pair of opposing approaches that share a green.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectionGroup {
    NorthSouth,
    EastWest,
}

impl DirectionGroup {
    pub fn directions(self) -> [Direction; 2] {
        match self {
            Self::NorthSouth => [Direction::North, Direction::South],
            Self::EastWest => [Direction::East, Direction::West],
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::NorthSouth => Self::EastWest,
            Self::EastWest => Self::NorthSouth,
        }
    }

    pub fn green_phase(self) -> SignalPhase {
        match self {
            Self::NorthSouth => SignalPhase::NsGreen,
            Self::EastWest => SignalPhase::EwGreen,
        }
    }

    pub fn yellow_phase(self) -> SignalPhase {
        match self {
            Self::NorthSouth => SignalPhase::NsYellow,
            Self::EastWest => SignalPhase::EwYellow,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NorthSouth => "NS",
            Self::EastWest => "EW",
        }
    }
}

/// Signal phase applied to a junction. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalPhase {
    NsGreen,
    EwGreen,
    NsYellow,
    EwYellow,
    AllRed,
}

impl SignalPhase {
    /// Program phase index in the simulator's signal plan.
    pub fn index(self) -> u8 {
        match self {
            Self::NsGreen => 0,
            Self::NsYellow => 1,
            Self::AllRed => 2,
            Self::EwGreen => 3,
            Self::EwYellow => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::NsGreen),
            1 => Some(Self::NsYellow),
            2 => Some(Self::AllRed),
            3 => Some(Self::EwGreen),
            4 => Some(Self::EwYellow),
            _ => None,
        }
    }

    pub fn is_green(self) -> bool {
        matches!(self, Self::NsGreen | Self::EwGreen)
    }

    pub fn is_yellow(self) -> bool {
        matches!(self, Self::NsYellow | Self::EwYellow)
    }

    /// Group holding green in this phase.
    pub fn green_group(self) -> Option<DirectionGroup> {
        match self {
            Self::NsGreen => Some(DirectionGroup::NorthSouth),
            Self::EwGreen => Some(DirectionGroup::EastWest),
            _ => None,
        }
    }

    /// Group whose movement this phase belongs to (green or clearing yellow).
    pub fn movement_group(self) -> Option<DirectionGroup> {
        match self {
            Self::NsGreen | Self::NsYellow => Some(DirectionGroup::NorthSouth),
            Self::EwGreen | Self::EwYellow => Some(DirectionGroup::EastWest),
            Self::AllRed => None,
        }
    }

    /// Explicit signal-head state string for a four-arm, four-link junction.
    pub fn state_string(self) -> &'static str {
        match self {
            Self::NsGreen => "GGGgrrrrGGGgrrrr",
            Self::NsYellow => "yyyyrrrryyyyrrrr",
            Self::AllRed => "rrrrrrrrrrrrrrrr",
            Self::EwGreen => "rrrrGGGgrrrrGGGg",
            Self::EwYellow => "rrrryyyyrrrryyyy",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NsGreen => "NS_GREEN",
            Self::EwGreen => "EW_GREEN",
            Self::NsYellow => "NS_YELLOW",
            Self::EwYellow => "EW_YELLOW",
            Self::AllRed => "ALL_RED",
        }
    }
}

/// Fixed table with one slot per [`Direction`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionTable<T>([T; 4]);

impl<T> DirectionTable<T> {
    pub fn from_fn(mut f: impl FnMut(Direction) -> T) -> Self {
        Self([
            f(Direction::North),
            f(Direction::South),
            f(Direction::East),
            f(Direction::West),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &T)> {
        Direction::ALL.into_iter().zip(self.0.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    pub fn map<U>(&self, mut f: impl FnMut(Direction, &T) -> U) -> DirectionTable<U> {
        DirectionTable::from_fn(|d| f(d, &self.0[d.index()]))
    }
}

impl<T: Clone> DirectionTable<T> {
    pub fn splat(value: T) -> Self {
        Self::from_fn(|_| value.clone())
    }
}

impl<T> Index<Direction> for DirectionTable<T> {
    type Output = T;

    #[inline]
    fn index(&self, direction: Direction) -> &T {
        &self.0[direction.index()]
    }
}

impl<T> IndexMut<Direction> for DirectionTable<T> {
    #[inline]
    fn index_mut(&mut self, direction: Direction) -> &mut T {
        &mut self.0[direction.index()]
    }
}

/// One inbound approach: the road feeding the junction and its lanes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Approach {
    pub road: String,
    pub lanes: Vec<String>,
}

impl Approach {
    /// Approach whose lanes follow the `<road>_<n>` naming convention.
    pub fn with_lane_count(road: &str, lane_count: usize) -> Self {
        Self {
            road: road.to_string(),
            lanes: (0..lane_count).map(|i| format!("{road}_{i}")).collect(),
        }
    }
}

/// Static description of a signalized junction and its four approaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionLayout {
    pub junction_id: String,
    pub approaches: DirectionTable<Approach>,
}

impl JunctionLayout {
    /// Standard four-arm cross with three lanes per approach.
    pub fn four_arm(junction_id: &str, roads: [&str; 4]) -> Self {
        Self {
            junction_id: junction_id.to_string(),
            approaches: DirectionTable::from_fn(|d| Approach::with_lane_count(roads[d.index()], 3)),
        }
    }

    /// Resolves the approach direction of a vehicle from the road it is on.
    pub fn direction_of_road(&self, road: &str) -> Option<Direction> {
        self.approaches
            .iter()
            .find(|(_, approach)| approach.road == road)
            .map(|(d, _)| d)
    }
}
