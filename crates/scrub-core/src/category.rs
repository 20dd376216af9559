use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CategoryError;

/// GDELT QuadClass: the four fixed event classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CategoryCode {
    VerbalCooperation = 1,
    MaterialCooperation = 2,
    VerbalConflict = 3,
    MaterialConflict = 4,
}

impl CategoryCode {
    pub const ALL: [CategoryCode; 4] = [
        CategoryCode::VerbalCooperation,
        CategoryCode::MaterialCooperation,
        CategoryCode::VerbalConflict,
        CategoryCode::MaterialConflict,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, CategoryError> {
        match code {
            1 => Ok(Self::VerbalCooperation),
            2 => Ok(Self::MaterialCooperation),
            3 => Ok(Self::VerbalConflict),
            4 => Ok(Self::MaterialConflict),
            other => Err(CategoryError(other)),
        }
    }

    /// Upper-snake identifier, as used by the published data layout.
    pub fn ident(self) -> &'static str {
        match self {
            Self::VerbalCooperation => "VERBAL_COOPERATION",
            Self::MaterialCooperation => "MATERIAL_COOPERATION",
            Self::VerbalConflict => "VERBAL_CONFLICT",
            Self::MaterialConflict => "MATERIAL_CONFLICT",
        }
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ident())
    }
}

impl TryFrom<u8> for CategoryCode {
    type Error = CategoryError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<CategoryCode> for u8 {
    fn from(c: CategoryCode) -> Self {
        c.code()
    }
}
