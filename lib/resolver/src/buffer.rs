use bytes::{BufMut, BytesMut};

use crate::consts::{COLON, COMMA, LBRACE, QUOTE, RBRACE};

/// A pair of append-only byte buffers holding rendered `data` and `errors`
/// fragments. The two halves always travel together so that merging a child
/// result into its parent keeps data and errors in step.
#[derive(Debug, Default)]
pub struct BufPair {
    pub data: BytesMut,
    pub errors: BytesMut,
}

impl BufPair {
    pub fn new() -> Self {
        BufPair {
            data: BytesMut::with_capacity(1024),
            errors: BytesMut::new(),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.errors.clear();
    }

    /// Appends one serialized GraphQL error object. `message` must already be
    /// valid JSON string content; `locations`, `path` and `extensions` are
    /// raw JSON fragments and are omitted when absent.
    pub fn write_err(
        &mut self,
        message: &[u8],
        locations: Option<&[u8]>,
        path: Option<&[u8]>,
        extensions: Option<&[u8]>,
    ) {
        if self.has_errors() {
            self.errors.put_slice(COMMA);
        }
        self.errors.put_slice(LBRACE);
        self.errors.put_slice(b"\"message\"");
        self.errors.put_slice(COLON);
        self.errors.put_slice(QUOTE);
        self.errors.put_slice(message);
        self.errors.put_slice(QUOTE);
        if let Some(locations) = locations {
            self.errors.put_slice(b",\"locations\"");
            self.errors.put_slice(COLON);
            self.errors.put_slice(locations);
        }
        if let Some(path) = path {
            self.errors.put_slice(b",\"path\"");
            self.errors.put_slice(COLON);
            self.errors.put_slice(path);
        }
        if let Some(extensions) = extensions {
            self.errors.put_slice(b",\"extensions\"");
            self.errors.put_slice(COLON);
            self.errors.put_slice(extensions);
        }
        self.errors.put_slice(RBRACE);
    }

    /// Moves `from` into `self`, draining both halves of `from`.
    pub fn merge(&mut self, from: &mut BufPair, prefix_data_with_comma: bool) {
        self.merge_data(from, prefix_data_with_comma);
        self.merge_errors(from);
    }

    pub fn merge_data(&mut self, from: &mut BufPair, prefix_data_with_comma: bool) {
        if !from.has_data() {
            return;
        }
        if prefix_data_with_comma {
            self.data.put_slice(COMMA);
        }
        self.data.put_slice(&from.data);
        from.data.clear();
    }

    pub fn merge_errors(&mut self, from: &mut BufPair) {
        if !from.has_errors() {
            return;
        }
        if self.has_errors() {
            self.errors.put_slice(COMMA);
        }
        self.errors.put_slice(&from.errors);
        from.errors.clear();
    }
}
