use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use oscar_oft::{DirectImBody, InlineImage, ODC_MAX_PAYLOAD, OftError, img_tags};

/// Images the local user can reference from outgoing direct IMs with
/// `<IMG ID="n">`.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: HashMap<u32, InlineImage>,
}

impl ImageStore {
    pub fn insert(&mut self, id: u32, name: impl Into<String>, data: Vec<u8>) {
        self.images.insert(
            id,
            InlineImage {
                id,
                name: name.into(),
                data,
            },
        );
    }

    pub fn remove(&mut self, id: u32) -> Option<InlineImage> {
        self.images.remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&InlineImage> {
        self.images.get(&id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Build a message body from outgoing text. Each known image tag is
    /// rewritten with the stored name and size, and its bytes are attached
    /// once. Unknown ids are left in the text untouched.
    pub fn resolve(&self, text: &str) -> DirectImBody {
        let mut out = String::with_capacity(text.len());
        let mut images: Vec<InlineImage> = Vec::new();
        let mut last = 0;

        for tag in img_tags(text) {
            let Some(image) = tag.id.and_then(|id| self.images.get(&id)) else {
                debug!(id = ?tag.id, "leaving unresolved image tag");
                continue;
            };
            out.push_str(&text[last..tag.start]);
            out.push_str(&format!(
                "<IMG SRC=\"{}\" ID=\"{}\" DATASIZE=\"{}\">",
                image.name,
                image.id,
                image.data.len()
            ));
            last = tag.end;
            if !images.iter().any(|i| i.id == image.id) {
                images.push(image.clone());
            }
        }
        out.push_str(&text[last..]);

        DirectImBody { text: out, images }
    }

    /// Resolve `text` and encode it as a message payload, refusing bodies
    /// the peer would reject as oversized.
    pub fn message(&self, text: &str) -> Result<Bytes, OftError> {
        let payload = self.resolve(text).encode();
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        if len > ODC_MAX_PAYLOAD {
            return Err(OftError::PayloadTooLarge(len));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_images_once() {
        let mut store = ImageStore::default();
        store.insert(1, "smile.gif", vec![1, 2, 3]);

        let body = store.resolve("hi <img id=\"1\"> and <IMG ID=\"1\"> <IMG ID=\"9\">");
        assert_eq!(
            body.text,
            "hi <IMG SRC=\"smile.gif\" ID=\"1\" DATASIZE=\"3\"> and \
             <IMG SRC=\"smile.gif\" ID=\"1\" DATASIZE=\"3\"> <IMG ID=\"9\">"
        );
        assert_eq!(body.images.len(), 1);
        assert_eq!(body.images[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn plain_text_passes_through() {
        let store = ImageStore::default();
        let body = store.resolve("no pictures here");
        assert_eq!(body.text, "no pictures here");
        assert!(body.images.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn resolved_body_decodes() {
        let mut store = ImageStore::default();
        store.insert(4, "cat.png", b"png-bytes".to_vec());
        let body = store.resolve("look <IMG ID=\"4\">");
        let decoded = DirectImBody::decode(&body.encode()).unwrap();
        assert_eq!(decoded.images.len(), 1);
        assert_eq!(decoded.images[0].name, "cat.png");
        assert_eq!(decoded.images[0].data, b"png-bytes");
        assert_eq!(store.get(4).map(|i| i.name.as_str()), Some("cat.png"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn oversized_message_is_refused() {
        let mut store = ImageStore::default();
        store.insert(7, "huge.bmp", vec![0; ODC_MAX_PAYLOAD as usize]);
        assert!(matches!(
            store.message("<IMG ID=\"7\">"),
            Err(OftError::PayloadTooLarge(_))
        ));
        assert_eq!(store.message("just text").unwrap(), Bytes::from_static(b"just text"));

        assert!(store.remove(7).is_some());
        assert!(store.remove(7).is_none());
        assert!(store.is_empty());
        let body = store.message("<IMG ID=\"7\">").unwrap();
        assert_eq!(body, Bytes::from_static(b"<IMG ID=\"7\">"));
    }
}
