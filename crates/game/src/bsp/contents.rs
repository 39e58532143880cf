bitflags::bitflags! {
    /// Leaf contents as a mask, so traces can stop on several kinds at once.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Contents: u32 {
        const EMPTY = 1 << 0;
        const SOLID = 1 << 1;
        const WATER = 1 << 2;
        const SLIME = 1 << 3;
        const LAVA = 1 << 4;
        const SKY = 1 << 5;

        const LIQUID = Self::WATER.bits() | Self::SLIME.bits() | Self::LAVA.bits();
    }
}

impl Default for Contents {
    fn default() -> Self {
        Contents::empty()
    }
}

impl Contents {
    pub const CONTENTS_EMPTY: i32 = -1;
    pub const CONTENTS_SOLID: i32 = -2;
    pub const CONTENTS_WATER: i32 = -3;
    pub const CONTENTS_SLIME: i32 = -4;
    pub const CONTENTS_LAVA: i32 = -5;
    pub const CONTENTS_SKY: i32 = -6;

    /// Maps the file's negative contents code; unknown codes map to nothing.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            Self::CONTENTS_EMPTY => Self::EMPTY,
            Self::CONTENTS_SOLID => Self::SOLID,
            Self::CONTENTS_WATER => Self::WATER,
            Self::CONTENTS_SLIME => Self::SLIME,
            Self::CONTENTS_LAVA => Self::LAVA,
            Self::CONTENTS_SKY => Self::SKY,
            _ => Self::empty(),
        }
    }
}
