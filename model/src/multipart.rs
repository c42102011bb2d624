//! Minimal `multipart/form-data` encoding for file uploads.

use uuid::Uuid;

/// A `multipart/form-data` body under construction.
#[derive(Clone, Debug)]
pub(crate) struct Form {
    boundary: String,
    body: Vec<u8>,
}

impl Form {
    pub(crate) fn new() -> Self {
        Self {
            boundary: format!("----chef-{}", Uuid::new_v4().simple()),
            body: vec![],
        }
    }

    /// Add a plain text field.
    pub(crate) fn text(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.part_header(name, None, None);
        self.body.extend_from_slice(value.as_ref().as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Add a file field.
    pub(crate) fn file(
        mut self,
        name: &str,
        file_name: &str,
        content_type: &str,
        contents: &[u8],
    ) -> Self {
        self.part_header(name, Some(file_name), Some(content_type));
        self.body.extend_from_slice(contents);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// The value of the `Content-Type` header for this form.
    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Close the form and return the encoded body.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }

    /// Attach this form as the body of `req`.
    pub(crate) fn attach(self, req: surf::RequestBuilder) -> surf::RequestBuilder {
        let content_type = self.content_type();
        // The body sets its own content type, so the header has to come after it.
        req.body(surf::Body::from_bytes(self.finish()))
            .header("Content-Type", content_type)
    }

    fn part_header(&mut self, name: &str, file_name: Option<&str>, content_type: Option<&str>) {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            escape(name)
        );
        if let Some(file_name) = file_name {
            header += &format!("; filename=\"{}\"", escape(file_name));
        }
        header += "\r\n";
        if let Some(content_type) = content_type {
            header += &format!("Content-Type: {content_type}\r\n");
        }
        header += "\r\n";
        self.body.extend_from_slice(header.as_bytes());
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
