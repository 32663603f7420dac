//! Prose markup for the placeholder-bearing reply text.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Runs on escaped text, so query separators appear as `&amp;`. Placeholder
    // delimiters are private-use characters outside every class used here.
    static ref VIDEO_LINK: Regex = Regex::new(
        r"https?://(?:(?:www\.|m\.)?youtube\.com/watch\?v=|youtu\.be/)([A-Za-z0-9_-]{11})(?:(?:\?|&amp;)[A-Za-z0-9=%.\-]*)*"
    )
    .expect("video link pattern");
    static ref EMPHASIS: Regex = Regex::new(r"\*\*(.*?)\*\*").expect("emphasis pattern");
}

pub fn format_text(text: &str) -> String {
    let escaped = escape_html(text);
    let embedded = VIDEO_LINK.replace_all(&escaped, |caps: &regex::Captures| video_player(&caps[1]));
    let emphasized = EMPHASIS.replace_all(&embedded, "<strong>$1</strong>");
    emphasized.replace("\r\n", "<br>").replace('\n', "<br>")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn video_player(video_id: &str) -> String {
    format!(
        "<div class=\"video-container\"><iframe src=\"https://www.youtube.com/embed/{video_id}\" \
         title=\"YouTube video player\" frameborder=\"0\" \
         allow=\"accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture\" \
         allowfullscreen></iframe></div>"
    )
}
