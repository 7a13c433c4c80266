use crate::request::Body;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioFile {
    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            filename: "recording.wav".into(),
            mime_type: "audio/wav".into(),
            bytes,
        }
    }
}

/// Builds a `multipart/form-data` body with one file part.
///
/// Returns the `Content-Type` header value alongside the body.
pub fn build_file_upload(field: &str, file: &AudioFile, extra: &[(&str, &str)]) -> (String, Body) {
    let boundary = format!("Boundary-{}", uuid::Uuid::new_v4());

    let mut body: Vec<u8> = Vec::new();
    append_file(
        &mut body,
        &boundary,
        field,
        &file.filename,
        &file.mime_type,
        &file.bytes,
    );
    for (name, value) in extra {
        append_field(&mut body, &boundary, name, value);
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    (
        format!("multipart/form-data; boundary={}", boundary),
        Body::MultipartFormData {
            boundary,
            bytes: body,
        },
    )
}

fn append_field(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
    );
    body.extend_from_slice(value.as_bytes());
    body.extend_from_slice(b"\r\n");
}

fn append_file(
    body: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    filename: &str,
    mime_type: &str,
    bytes: &[u8],
) {
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
}
