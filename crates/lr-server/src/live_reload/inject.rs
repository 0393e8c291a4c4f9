//! Splicing the client script into HTML pages.

use super::script::INJECTION_MARKER;

const BODY_CLOSE: &[u8] = b"</body>";

/// Insert `block` before the last `</body>` of `html`.
///
/// Works on raw bytes so pages in any ASCII-compatible encoding pass through
/// unchanged apart from the block. Pages already carrying the marker are
/// returned untouched. Without a closing body tag the block is appended.
pub(crate) fn inject_script(html: &[u8], block: &str) -> Vec<u8> {
    let marker = INJECTION_MARKER.as_bytes();
    if html.windows(marker.len()).any(|w| w == marker) {
        return html.to_vec();
    }

    let position = html
        .windows(BODY_CLOSE.len())
        .rposition(|w| w.eq_ignore_ascii_case(BODY_CLOSE));
    let mut out = Vec::with_capacity(html.len() + block.len());
    match position {
        Some(index) => {
            out.extend_from_slice(&html[..index]);
            out.extend_from_slice(block.as_bytes());
            out.extend_from_slice(&html[index..]);
        }
        None => {
            out.extend_from_slice(html);
            out.extend_from_slice(block.as_bytes());
        }
    }
    out
}
