//! Converting binary data to a `data:` URL.

use base64::{Engine as _, prelude::BASE64_STANDARD};

/// Convert binary data to a `data:` URL, as accepted by the `image_url` parts
/// of an OpenAI-style chat message.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    // Percent-encoding the Base64 payload breaks several vision models, so we
    // don't.
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}
