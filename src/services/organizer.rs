use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::nfo::VideoNfo;
use crate::utils::normalizations::normalize_filename;

#[derive(Debug, thiserror::Error)]
pub enum OrganizerError {
    #[error("Root path does not exist or is not a directory: {0}")]
    InvalidPath(PathBuf),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Field '{0}' is required by the pattern but is empty")]
    MissingField(String),
}

/// Fully qualified media paths produced by the organizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaPaths {
    pub video_path: PathBuf,
    pub nfo_path: PathBuf,
}

enum Segment {
    Literal(String),
    Field(String),
}

/// Builds the canonical `(video, nfo)` paths for a video from a `{field}`
/// pattern. Pure: the only filesystem touch is validating that `root` is an
/// existing directory.
pub fn build_media_paths(
    root: &Path,
    nfo: &VideoNfo,
    pattern: &str,
    normalize: bool,
) -> Result<MediaPaths, OrganizerError> {
    if !root.is_dir() {
        return Err(OrganizerError::InvalidPath(root.to_path_buf()));
    }

    let segments = parse_pattern(pattern)?;

    let mut values: HashMap<&str, String> = HashMap::new();
    for segment in &segments {
        let Segment::Field(name) = segment else { continue };

        let descriptor = VideoNfo::field(name).ok_or_else(|| OrganizerError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("unknown field '{name}'"),
        })?;

        if name == "tags" {
            return Err(OrganizerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "field 'tags' is a list and cannot be used in a path pattern".to_string(),
            });
        }

        let value = (descriptor.value)(nfo).ok_or_else(|| OrganizerError::MissingField(name.clone()))?;
        let value = if normalize { normalize_filename(&value) } else { value };

        // a value that normalizes away entirely must not leave an empty segment
        if value.trim().is_empty() {
            return Err(OrganizerError::MissingField(name.clone()));
        }

        values.insert(name.as_str(), value);
    }

    let mut relative = String::new();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => relative.push_str(text),
            Segment::Field(name) => {
                if let Some(value) = values.get(name.as_str()) {
                    relative.push_str(value);
                }
            }
        }
    }

    let video_path = root.join(format!("{relative}.mp4"));
    let nfo_path = root.join(format!("{relative}.nfo"));

    log::debug!(
        "media paths built: pattern={pattern:?} normalize={normalize} video={}",
        video_path.display()
    );

    Ok(MediaPaths { video_path, nfo_path })
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, OrganizerError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }

                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(OrganizerError::InvalidPattern {
                                pattern: pattern.to_string(),
                                reason: "nested '{' inside a placeholder".to_string(),
                            });
                        }
                        Some(c) => field.push(c),
                        None => {
                            return Err(OrganizerError::InvalidPattern {
                                pattern: pattern.to_string(),
                                reason: "unterminated '{' placeholder".to_string(),
                            });
                        }
                    }
                }

                if field.is_empty() {
                    return Err(OrganizerError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "empty placeholder".to_string(),
                    });
                }

                segments.push(Segment::Field(field));
            }
            '}' => {
                return Err(OrganizerError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "'}' without a matching '{'".to_string(),
                });
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}
