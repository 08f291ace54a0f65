use super::{Serialize, Deserialize};

/// The NFO-shaped metadata record the organizer consumes. Mirrors the
/// scalar fields written to a musicvideo sidecar, plus the two list fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VideoNfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub studio: Option<String>,
    pub year: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub featured_artists: Vec<String>,
    pub tags: Vec<String>,
}

/// Descriptor for one NFO field: its pattern name, whether it is a list,
/// and how to read it as a path segment. Pattern validation and extraction
/// walk this table instead of reflecting over the struct; the test below
/// pins the table to the struct's actual fields.
pub struct NfoField {
    pub name: &'static str,
    pub is_list: bool,
    pub value: fn(&VideoNfo) -> Option<String>,
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub const NFO_FIELDS: &[NfoField] = &[
    NfoField { name: "title", is_list: false, value: |nfo| trimmed(&nfo.title) },
    NfoField { name: "artist", is_list: false, value: |nfo| trimmed(&nfo.artist) },
    NfoField { name: "album", is_list: false, value: |nfo| trimmed(&nfo.album) },
    NfoField { name: "studio", is_list: false, value: |nfo| trimmed(&nfo.studio) },
    NfoField { name: "year", is_list: false, value: |nfo| nfo.year.map(|y| y.to_string()) },
    NfoField { name: "director", is_list: false, value: |nfo| trimmed(&nfo.director) },
    NfoField { name: "genre", is_list: false, value: |nfo| trimmed(&nfo.genre) },
    NfoField {
        name: "featured_artists",
        is_list: true,
        value: |nfo| {
            if nfo.featured_artists.is_empty() {
                None
            } else {
                Some(nfo.featured_artists.join(", "))
            }
        },
    },
    // Tags are a list with no meaningful path rendering; the organizer
    // rejects patterns that reference them.
    NfoField { name: "tags", is_list: true, value: |_| None },
];

impl VideoNfo {
    pub fn field(name: &str) -> Option<&'static NfoField> {
        NFO_FIELDS.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    // Keeps NFO_FIELDS honest: every struct field has a descriptor and
    // every descriptor names a struct field.
    #[test]
    fn descriptor_table_matches_struct_fields() {
        let nfo = VideoNfo::default();
        let value = serde_json::to_value(&nfo).unwrap();

        let struct_fields: BTreeSet<String> = value
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        let descriptor_fields: BTreeSet<String> =
            NFO_FIELDS.iter().map(|f| f.name.to_string()).collect();

        assert_eq!(struct_fields, descriptor_fields);
    }

    #[test]
    fn scalar_values_are_trimmed() {
        let nfo = VideoNfo {
            artist: Some("  Robin Thicke  ".to_string()),
            ..VideoNfo::default()
        };

        let field = VideoNfo::field("artist").unwrap();
        assert_eq!((field.value)(&nfo), Some("Robin Thicke".to_string()));
    }

    #[test]
    fn blank_scalar_reads_as_absent() {
        let nfo = VideoNfo {
            album: Some("   ".to_string()),
            ..VideoNfo::default()
        };

        let field = VideoNfo::field("album").unwrap();
        assert_eq!((field.value)(&nfo), None);
    }

    #[test]
    fn featured_artists_join_with_comma_space() {
        let nfo = VideoNfo {
            featured_artists: vec!["T.I.".to_string(), "Pharrell Williams".to_string()],
            ..VideoNfo::default()
        };

        let field = VideoNfo::field("featured_artists").unwrap();
        assert_eq!((field.value)(&nfo), Some("T.I., Pharrell Williams".to_string()));
    }

    #[test]
    fn year_renders_as_decimal() {
        let nfo = VideoNfo {
            year: Some(2013),
            ..VideoNfo::default()
        };

        let field = VideoNfo::field("year").unwrap();
        assert_eq!((field.value)(&nfo), Some("2013".to_string()));
    }
}
