use url::Url;

const WATCH_BASE: &str = "https://www.youtube.com/watch?v=";

/// A recognised video link, reduced to its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoLink {
    pub id: String,
}

impl VideoLink {
    /// Returns `None` for free-text queries and for links to anything but a
    /// single video.
    pub fn parse(input: &str) -> Option<Self> {
        let url = Url::parse(input.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.trim_start_matches("www.");

        let id = match host {
            "youtu.be" => url.path_segments()?.next().map(str::to_string),
            "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
                let mut segments = url.path_segments()?;
                match segments.next() {
                    Some("watch") => url
                        .query_pairs()
                        .find(|(k, _)| k == "v")
                        .map(|(_, v)| v.into_owned()),
                    Some("shorts") | Some("embed") | Some("live") => {
                        segments.next().map(str::to_string)
                    }
                    _ => None,
                }
            }
            _ => None,
        }?;

        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(Self { id })
    }

    /// Canonical watch URL; extra query parameters are dropped.
    pub fn canonical(&self) -> String {
        format!("{WATCH_BASE}{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(input: &str) -> Option<String> {
        VideoLink::parse(input).map(|l| l.id)
    }

    #[test]
    fn recognises_common_link_shapes() {
        assert_eq!(id_of("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(
            id_of("https://youtube.com/watch?list=PL1&v=dQw4w9WgXcQ&t=42").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(id_of("https://youtu.be/dQw4w9WgXcQ?si=xyz").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(id_of("https://m.youtube.com/shorts/a-b_C1").as_deref(), Some("a-b_C1"));
        assert_eq!(id_of("https://music.youtube.com/watch?v=abc").as_deref(), Some("abc"));
    }

    #[test]
    fn free_text_and_foreign_links_are_not_links() {
        assert_eq!(id_of("Tum Hi Ho"), None);
        assert_eq!(id_of("https://vimeo.com/12345"), None);
        assert_eq!(id_of("https://www.youtube.com/playlist?list=PL1"), None);
        assert_eq!(id_of("ftp://youtube.com/watch?v=abc"), None);
    }

    #[test]
    fn canonical_form_strips_extras() {
        let link = VideoLink::parse("https://youtube.com/watch?v=abc&list=PL1").unwrap();
        assert_eq!(link.canonical(), "https://www.youtube.com/watch?v=abc");
    }
}
