//! Plain-text transcription of policy PDFs
//!
//! The extraction pipeline only needs a best-effort text dump of the document;
//! layout recovery is left to the model. `PdfTextSource` loads the document
//! with lopdf (handling empty-password encryption), pulls the text out with
//! pdf-extract and normalizes whitespace so the prompt stays compact.

mod clean;
mod error;

pub use clean::clean_text;
pub use error::{PdfError, Result};

use lopdf::Document;
use tracing::debug;

/// Anything that can turn a document into plain text.
pub trait TextSource: Send + Sync {
    fn extract_text(&self, data: &[u8]) -> Result<String>;
}

/// PDF text source backed by lopdf + pdf-extract.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextSource;

impl PdfTextSource {
    pub fn new() -> Self {
        Self
    }

    /// Load the document and return bytes pdf-extract can read.
    ///
    /// Encrypted documents are decrypted with the empty password and
    /// re-serialized; anything else is passed through untouched.
    fn readable_bytes(data: &[u8]) -> Result<Vec<u8>> {
        let mut doc = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

        let bytes = if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("decrypted PDF with empty password");
            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {e}")))?;
            decrypted
        } else {
            data.to_vec()
        };

        let pages = doc.get_pages().len();
        if pages == 0 {
            return Err(PdfError::NoPages);
        }

        debug!(pages, "loaded PDF");
        Ok(bytes)
    }
}

impl TextSource for PdfTextSource {
    fn extract_text(&self, data: &[u8]) -> Result<String> {
        let bytes = Self::readable_bytes(data)?;
        // pdf-extract panics on some documents lopdf accepts (e.g. a font
        // referenced by the content stream but missing from the resources)
        let raw = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(&bytes)
        }))
        .map_err(|payload| {
            PdfError::TextExtraction(format!("extractor panicked: {}", panic_message(&*payload)))
        })?
        .map_err(|e| PdfError::TextExtraction(e.to_string()))?;

        let text = clean_text(&raw);
        if text.is_empty() {
            return Err(PdfError::Empty);
        }
        debug!(chars = text.len(), "extracted PDF text");
        Ok(text)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let err = PdfTextSource::new()
            .extract_text(b"definitely not a pdf")
            .unwrap_err();
        assert!(matches!(err, PdfError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn empty_input_fails_to_parse() {
        let err = PdfTextSource::new().extract_text(&[]).unwrap_err();
        assert!(matches!(err, PdfError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn extracts_text_from_single_page() {
        let data = save(&mut fixtures::one_page(Some("Policy Number R-1"), true));
        let text = PdfTextSource::new().extract_text(&data).unwrap();
        assert!(text.contains("Policy Number R-1"), "got {text:?}");
    }

    #[test]
    fn missing_font_is_extraction_error_not_panic() {
        let data = save(&mut fixtures::one_page(Some("Policy Number R-1"), false));
        let err = PdfTextSource::new().extract_text(&data).unwrap_err();
        assert!(matches!(err, PdfError::TextExtraction(_)), "got {err:?}");
    }

    #[test]
    fn document_without_pages_is_rejected() {
        let data = save(&mut fixtures::no_pages());
        let err = PdfTextSource::new().extract_text(&data).unwrap_err();
        assert!(matches!(err, PdfError::NoPages), "got {err:?}");
    }

    #[test]
    fn page_without_text_is_empty() {
        let data = save(&mut fixtures::one_page(None, true));
        let err = PdfTextSource::new().extract_text(&data).unwrap_err();
        assert!(matches!(err, PdfError::Empty), "got {err:?}");
    }

    #[test]
    fn empty_user_password_is_decrypted() {
        let mut doc = fixtures::one_page(Some("Policy Number R-1"), true);
        fixtures::encrypt_rc4(&mut doc, b"");
        let data = save(&mut doc);
        assert!(Document::load_mem(&data).unwrap().is_encrypted());

        let text = PdfTextSource::new().extract_text(&data).unwrap();
        assert!(text.contains("Policy Number R-1"), "got {text:?}");
    }

    #[test]
    fn non_empty_user_password_is_encrypted_error() {
        let mut doc = fixtures::one_page(Some("Policy Number R-1"), true);
        fixtures::encrypt_rc4(&mut doc, b"s3cret");
        let data = save(&mut doc);

        let err = PdfTextSource::new().extract_text(&data).unwrap_err();
        assert!(matches!(err, PdfError::Encrypted), "got {err:?}");
    }

    fn save(doc: &mut Document) -> Vec<u8> {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Small documents built with lopdf.
    mod fixtures {
        use lopdf::content::{Content, Operation};
        use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};

        fn catalog(doc: &mut Document, pages_id: ObjectId) {
            let catalog_id = doc.add_object(dictionary! {
                "Type" => "Catalog",
                "Pages" => pages_id,
            });
            doc.trailer.set("Root", catalog_id);
        }

        /// One A4 page showing `text` in Courier. Without `with_font` the
        /// content stream still selects /F1 but the resources omit it.
        pub fn one_page(text: Option<&str>, with_font: bool) -> Document {
            let mut doc = Document::with_version("1.5");
            let pages_id = doc.new_object_id();

            let resources = if with_font {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Courier",
                });
                dictionary! { "Font" => dictionary! { "F1" => font_id } }
            } else {
                dictionary! {}
            };
            let resources_id = doc.add_object(resources);

            let operations = match text {
                Some(text) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(text)]),
                    Operation::new("ET", vec![]),
                ],
                None => Vec::new(),
            };
            let content = Content { operations }.encode().unwrap();
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            doc.objects.insert(
                pages_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => vec![page_id.into()],
                    "Count" => 1,
                }),
            );
            catalog(&mut doc, pages_id);
            doc
        }

        /// Valid catalog whose page tree is empty.
        pub fn no_pages() -> Document {
            let mut doc = Document::with_version("1.5");
            let pages_id = doc.add_object(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => 0,
            });
            catalog(&mut doc, pages_id);
            doc
        }

        const PAD: [u8; 32] = [
            0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA,
            0x01, 0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE,
            0x64, 0x53, 0x69, 0x7A,
        ];

        fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
            let mut s: Vec<u8> = (0..=255).collect();
            let mut j = 0u8;
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
            let (mut i, mut j) = (0u8, 0u8);
            data.iter()
                .map(|byte| {
                    i = i.wrapping_add(1);
                    j = j.wrapping_add(s[i as usize]);
                    s.swap(i as usize, j as usize);
                    byte ^ s[s[i as usize].wrapping_add(s[j as usize]) as usize]
                })
                .collect()
        }

        /// Encrypt every stream with the standard security handler
        /// (revision 2, 40-bit RC4) for the given user password.
        pub fn encrypt_rc4(doc: &mut Document, user_password: &[u8]) {
            let owner = [0x5Au8; 32];
            let permissions: i64 = -4;
            let file_id = b"policy-extract-0".to_vec();

            let mut seed = user_password.to_vec();
            seed.extend_from_slice(&PAD[..32 - user_password.len()]);
            seed.extend_from_slice(&owner);
            seed.extend_from_slice(&(permissions as u32).to_le_bytes());
            seed.extend_from_slice(&file_id);
            let key = md5::compute(&seed).0[..5].to_vec();

            for (&(num, generation), object) in doc.objects.iter_mut() {
                if let Object::Stream(stream) = object {
                    let mut object_seed = key.clone();
                    object_seed.extend_from_slice(&num.to_le_bytes()[..3]);
                    object_seed.extend_from_slice(&generation.to_le_bytes());
                    let object_key = md5::compute(&object_seed).0;
                    let encrypted = rc4(&object_key[..10], &stream.content);
                    stream.set_content(encrypted);
                }
            }

            let encrypt_id = doc.add_object(dictionary! {
                "Filter" => "Standard",
                "V" => 1,
                "R" => 2,
                "Length" => 40,
                "P" => permissions,
                "O" => Object::String(owner.to_vec(), StringFormat::Hexadecimal),
                "U" => Object::String(rc4(&key, &PAD), StringFormat::Hexadecimal),
                "CF" => dictionary! { "StdCF" => dictionary! { "CFM" => "V2" } },
            });
            doc.trailer.set("Encrypt", encrypt_id);
            doc.trailer.set(
                "ID",
                vec![
                    Object::String(file_id.clone(), StringFormat::Hexadecimal),
                    Object::String(file_id, StringFormat::Hexadecimal),
                ],
            );
        }
    }
}
