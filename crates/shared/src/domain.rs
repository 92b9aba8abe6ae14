use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AspectParseError;

/// Width every generated picture is requested at unless configured otherwise.
pub const DEFAULT_BASE_WIDTH: u32 = 1024;

/// Inference steps sent with every generation request.
pub const NUM_INFERENCE_STEPS: u32 = 4;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ImageId);

/// A generated picture that has been persisted and carries its store id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub src: String,
    pub prompt: String,
    pub seed: u32,
}

/// A picture that has not been written to the store yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    pub src: String,
    pub prompt: String,
    pub seed: u32,
}

impl NewImage {
    pub fn with_id(self, id: ImageId) -> Image {
        Image {
            id,
            src: self.src,
            prompt: self.prompt,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Wide,
        AspectRatio::Tall,
    ];

    /// Returns the `(W, H)` parts of the `"W:H"` token.
    pub fn parts(self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Landscape => (4, 3),
            AspectRatio::Portrait => (3, 4),
            AspectRatio::Wide => (16, 9),
            AspectRatio::Tall => (9, 16),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for AspectRatio {
    type Err = AspectParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|aspect| aspect.token() == token)
            .ok_or_else(|| AspectParseError(token.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Height is `floor(base_width * H / W)`; the width is always `base_width`.
    pub fn from_aspect(aspect: AspectRatio, base_width: u32) -> Self {
        let (w, h) = aspect.parts();
        let height = u64::from(base_width) * u64::from(h) / u64::from(w);
        Self {
            width: base_width,
            height: height as u32,
        }
    }
}
