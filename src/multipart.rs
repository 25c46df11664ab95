use std::fmt::Write as _;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::error::Error;

/// One file part of a [`MultipartForm`].
#[derive(Clone, Debug)]
pub struct MultipartFile {
    field_name: String,
    file_name: String,
    content: Bytes,
}

impl MultipartFile {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    /// Reads a local file; the part's file name is the path's last component.
    pub async fn open(field_name: impl Into<String>, path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await.map_err(|source| Error::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(field_name, file_name, content))
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

/// Fields and files of a `multipart/form-data` upload.
#[derive(Clone, Debug, Default)]
pub struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<MultipartFile>,
}

pub(crate) struct EncodedMultipart {
    pub(crate) content_type: String,
    pub(crate) body: Bytes,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, file: MultipartFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.files.is_empty()
    }

    pub(crate) fn encode(&self) -> crate::Result<EncodedMultipart> {
        self.encode_with_boundary(&random_boundary())
    }

    /// Files come first, then fields, each in insertion order.
    fn encode_with_boundary(&self, boundary: &str) -> crate::Result<EncodedMultipart> {
        if self.is_empty() {
            return Err(Error::EmptyMultipart);
        }

        let mut body = BytesMut::new();
        for file in &self.files {
            let mut head = String::new();
            let _ = write!(
                head,
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                escape_quotes(&file.field_name),
                escape_quotes(&file.file_name)
            );
            body.put_slice(head.as_bytes());
            body.put_slice(&file.content);
            body.put_slice(b"\r\n");
        }
        for (name, value) in &self.fields {
            let mut head = String::new();
            let _ = write!(
                head,
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quotes(name)
            );
            body.put_slice(head.as_bytes());
            body.put_slice(value.as_bytes());
            body.put_slice(b"\r\n");
        }
        body.put_slice(format!("--{boundary}--\r\n").as_bytes());

        Ok(EncodedMultipart {
            content_type: format!("multipart/form-data; boundary={boundary}"),
            body: body.freeze(),
        })
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let mut rng = rand::rng();
    let mut boundary = String::with_capacity(60);
    for _ in 0..30 {
        let byte: u8 = rng.random();
        let _ = write!(boundary, "{byte:02x}");
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::{MultipartFile, MultipartForm, random_boundary};
    use crate::error::Error;

    #[test]
    fn empty_form_is_rejected() {
        let error = MultipartForm::new()
            .encode()
            .err()
            .expect("empty form must fail");
        assert!(matches!(error, Error::EmptyMultipart));
    }

    #[test]
    fn files_precede_fields() {
        let form = MultipartForm::new()
            .field("note", "hi")
            .file(MultipartFile::new("upload", "a.txt", "AAA"));
        let encoded = form
            .encode_with_boundary("XYZ")
            .expect("form should encode");
        assert_eq!(encoded.content_type, "multipart/form-data; boundary=XYZ");
        let expected = concat!(
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
            "Content-Type: application/octet-stream\r\n\r\n",
            "AAA\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"note\"\r\n\r\n",
            "hi\r\n",
            "--XYZ--\r\n",
        );
        assert_eq!(encoded.body.as_ref(), expected.as_bytes());
    }

    #[test]
    fn quotes_in_names_are_escaped() {
        let form = MultipartForm::new().field("say \"hi\"", "v");
        let encoded = form.encode_with_boundary("B").expect("form should encode");
        let text = String::from_utf8(encoded.body.to_vec()).expect("utf-8 body");
        assert!(text.contains("name=\"say \\\"hi\\\"\""));
    }

    #[test]
    fn boundaries_are_random_hex() {
        let first = random_boundary();
        assert_eq!(first.len(), 60);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(first, random_boundary());
    }

    #[tokio::test]
    async fn open_reads_file_and_keeps_its_name() {
        let path = std::env::temp_dir().join(format!("reqflow-multipart-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"file body")
            .await
            .expect("temp file should write");
        let file = MultipartFile::open("doc", &path)
            .await
            .expect("file should open");
        let _ = tokio::fs::remove_file(&path).await;
        assert_eq!(file.field_name(), "doc");
        assert_eq!(
            file.file_name(),
            path.file_name()
                .expect("temp path has a name")
                .to_string_lossy()
        );
        assert_eq!(file.content().as_ref(), b"file body");
    }

    #[tokio::test]
    async fn open_reports_missing_file() {
        let error = MultipartFile::open("doc", "/definitely/not/here.bin")
            .await
            .expect_err("missing file must fail");
        assert!(matches!(error, Error::ReadFile { .. }));
    }
}
