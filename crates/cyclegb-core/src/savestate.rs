//! Native save-state image.
//!
//! Every stateful component exposes `sync_state(&mut dyn StateVisitor)`, which
//! walks its fields in a fixed order. The same walk serves saving, loading and
//! size counting. The image is `CGBS`, a little-endian `u16` version, then one
//! record per field:
//!
//! ```text
//! [u8 name_len][name][u32 LE payload_len][payload]
//! ```
//!
//! Records are append-only. When an image from an older version runs out of
//! data, every remaining field keeps its current value. A current-version image
//! must carry every record and nothing after the last one.

use crate::error::StateError;

pub const STATE_MAGIC: [u8; 4] = *b"CGBS";
pub const STATE_VERSION: u16 = 2;

const HEADER_LEN: usize = 6;

pub trait StateVisitor {
    /// Open a named scope. Field names inside it are prefixed with `name.`.
    fn enter(&mut self, name: &str);
    fn exit(&mut self);
    /// Visit a fixed-size byte field.
    fn bytes(&mut self, name: &str, data: &mut [u8]);

    fn u8(&mut self, name: &str, v: &mut u8) {
        let mut buf = [*v];
        self.bytes(name, &mut buf);
        *v = buf[0];
    }

    fn bool(&mut self, name: &str, v: &mut bool) {
        let mut buf = [*v as u8];
        self.bytes(name, &mut buf);
        *v = buf[0] != 0;
    }

    fn u16(&mut self, name: &str, v: &mut u16) {
        let mut buf = v.to_le_bytes();
        self.bytes(name, &mut buf);
        *v = u16::from_le_bytes(buf);
    }

    fn u32(&mut self, name: &str, v: &mut u32) {
        let mut buf = v.to_le_bytes();
        self.bytes(name, &mut buf);
        *v = u32::from_le_bytes(buf);
    }

    fn i32(&mut self, name: &str, v: &mut i32) {
        let mut buf = v.to_le_bytes();
        self.bytes(name, &mut buf);
        *v = i32::from_le_bytes(buf);
    }

    fn u64(&mut self, name: &str, v: &mut u64) {
        let mut buf = v.to_le_bytes();
        self.bytes(name, &mut buf);
        *v = u64::from_le_bytes(buf);
    }

    fn i64(&mut self, name: &str, v: &mut i64) {
        let mut buf = v.to_le_bytes();
        self.bytes(name, &mut buf);
        *v = i64::from_le_bytes(buf);
    }
}

#[derive(Debug, Default)]
struct Scope {
    prefix: String,
    marks: Vec<usize>,
}

impl Scope {
    fn enter(&mut self, name: &str) {
        self.marks.push(self.prefix.len());
        self.prefix.push_str(name);
        self.prefix.push('.');
    }

    fn exit(&mut self) {
        if let Some(len) = self.marks.pop() {
            self.prefix.truncate(len);
        }
    }

    fn qualify(&self, name: &str) -> String {
        let mut full = String::with_capacity(self.prefix.len() + name.len());
        full.push_str(&self.prefix);
        full.push_str(name);
        full
    }
}

/// Serializes visited fields into a fresh image.
#[derive(Debug)]
pub struct StateWriter {
    out: Vec<u8>,
    scope: Scope,
}

impl StateWriter {
    pub fn new() -> Self {
        let mut out = Vec::with_capacity(0x20000);
        out.extend_from_slice(&STATE_MAGIC);
        out.extend_from_slice(&STATE_VERSION.to_le_bytes());
        Self {
            out,
            scope: Scope::default(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

impl Default for StateWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateVisitor for StateWriter {
    fn enter(&mut self, name: &str) {
        self.scope.enter(name);
    }

    fn exit(&mut self) {
        self.scope.exit();
    }

    fn bytes(&mut self, name: &str, data: &mut [u8]) {
        let full = self.scope.qualify(name);
        debug_assert!(full.len() <= u8::MAX as usize);
        self.out.push(full.len() as u8);
        self.out.extend_from_slice(full.as_bytes());
        self.out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        self.out.extend_from_slice(data);
    }
}

/// Reads an image back into visited fields.
///
/// With `apply == false` the reader only validates names and lengths and
/// leaves every field untouched. Loading runs a validating pass first and
/// applies only when it succeeds.
#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
    scope: Scope,
    apply: bool,
    version: u16,
    error: Option<StateError>,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8], apply: bool) -> Result<Self, StateError> {
        if data.len() < HEADER_LEN || data[..4] != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > STATE_VERSION {
            return Err(StateError::Version(version));
        }
        Ok(Self {
            data,
            pos: HEADER_LEN,
            scope: Scope::default(),
            apply,
            version,
            error: None,
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn finish(self) -> Result<(), StateError> {
        match self.error {
            Some(e) => Err(e),
            None if self.pos < self.data.len() => {
                Err(StateError::TrailingData(self.data.len() - self.pos))
            }
            None => Ok(()),
        }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}

impl StateVisitor for StateReader<'_> {
    fn enter(&mut self, name: &str) {
        self.scope.enter(name);
    }

    fn exit(&mut self) {
        self.scope.exit();
    }

    fn bytes(&mut self, name: &str, data: &mut [u8]) {
        if self.error.is_some() {
            return;
        }
        let full = self.scope.qualify(name);
        if self.pos >= self.data.len() {
            if self.version == STATE_VERSION {
                self.error = Some(StateError::Truncated(full));
            }
            return;
        }

        let Some(&[name_len]) = self.take(1) else {
            self.error = Some(StateError::Truncated(full));
            return;
        };
        let Some(found) = self.take(name_len as usize) else {
            self.error = Some(StateError::Truncated(full));
            return;
        };
        if found != full.as_bytes() {
            self.error = Some(StateError::FieldMismatch {
                expected: full,
                found: String::from_utf8_lossy(found).into_owned(),
            });
            return;
        }
        let Some(len) = self.take(4) else {
            self.error = Some(StateError::Truncated(full));
            return;
        };
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let Some(payload) = self.take(len) else {
            self.error = Some(StateError::Truncated(full));
            return;
        };
        if len != data.len() {
            self.error = Some(StateError::FieldMismatch {
                expected: format!("{full}[{}]", data.len()),
                found: format!("{full}[{len}]"),
            });
            return;
        }
        if self.apply {
            data.copy_from_slice(payload);
        }
    }
}

/// Measures the image size of a walk without producing it.
#[derive(Debug)]
pub struct StateCounter {
    size: usize,
    scope: Scope,
}

impl StateCounter {
    pub fn new() -> Self {
        Self {
            size: HEADER_LEN,
            scope: Scope::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for StateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateVisitor for StateCounter {
    fn enter(&mut self, name: &str) {
        self.scope.enter(name);
    }

    fn exit(&mut self) {
        self.scope.exit();
    }

    fn bytes(&mut self, name: &str, data: &mut [u8]) {
        self.size += 1 + self.scope.prefix.len() + name.len() + 4 + data.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        a: u8,
        b: u64,
        buf: [u8; 3],
    }

    impl Sample {
        fn sync_state(&mut self, v: &mut dyn StateVisitor) {
            v.enter("sample");
            v.u8("a", &mut self.a);
            v.u64("b", &mut self.b);
            v.bytes("buf", &mut self.buf);
            v.exit();
        }
    }

    fn image_of(s: &mut Sample) -> Vec<u8> {
        let mut w = StateWriter::new();
        s.sync_state(&mut w);
        w.into_bytes()
    }

    #[test]
    fn counter_matches_writer() {
        let mut s = Sample {
            a: 1,
            b: 2,
            buf: [3, 4, 5],
        };
        let mut c = StateCounter::new();
        s.sync_state(&mut c);
        assert_eq!(c.size(), image_of(&mut s).len());
    }

    #[test]
    fn older_image_missing_tail_keeps_current_values() {
        let mut src = Sample {
            a: 7,
            b: 0x1122_3344_5566_7788,
            buf: [9, 9, 9],
        };
        let mut image = image_of(&mut src);
        image[4..6].copy_from_slice(&(STATE_VERSION - 1).to_le_bytes());
        // Drop the last record ("sample.buf": 1 + 10 + 4 + 3 bytes).
        let cut = &image[..image.len() - 18];
        let mut dst = Sample {
            buf: [1, 2, 3],
            ..Sample::default()
        };
        let mut r = StateReader::new(cut, true).unwrap();
        dst.sync_state(&mut r);
        r.finish().unwrap();
        assert_eq!(dst.a, 7);
        assert_eq!(dst.b, 0x1122_3344_5566_7788);
        assert_eq!(dst.buf, [1, 2, 3]);
    }

    #[test]
    fn current_image_missing_tail_is_truncated() {
        let mut src = Sample::default();
        let image = image_of(&mut src);
        let cut = &image[..image.len() - 18];
        let mut dst = Sample::default();
        let mut r = StateReader::new(cut, false).unwrap();
        dst.sync_state(&mut r);
        assert_eq!(
            r.finish(),
            Err(StateError::Truncated("sample.buf".to_string()))
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut src = Sample::default();
        let mut image = image_of(&mut src);
        image.extend_from_slice(&[0, 0, 0]);
        let mut dst = Sample::default();
        let mut r = StateReader::new(&image, false).unwrap();
        dst.sync_state(&mut r);
        assert_eq!(r.finish(), Err(StateError::TrailingData(3)));
    }

    #[test]
    fn renamed_field_is_rejected() {
        let mut src = Sample::default();
        let mut image = image_of(&mut src);
        // "sample.a" -> "sample.x"
        let idx = image.iter().position(|&b| b == b'a').unwrap();
        image[idx] = b'x';
        let mut dst = Sample::default();
        let mut r = StateReader::new(&image, true).unwrap();
        dst.sync_state(&mut r);
        assert!(matches!(r.finish(), Err(StateError::FieldMismatch { .. })));
    }

    #[test]
    fn bad_magic_and_future_version_fail_early() {
        assert_eq!(
            StateReader::new(b"NOPE\x01\x00", true).unwrap_err(),
            StateError::BadMagic
        );
        assert_eq!(
            StateReader::new(b"CGBS\xFF\x00", true).unwrap_err(),
            StateError::Version(0xFF)
        );
    }

    #[test]
    fn validate_pass_leaves_fields_untouched() {
        let mut src = Sample {
            a: 5,
            b: 6,
            buf: [7, 8, 9],
        };
        let image = image_of(&mut src);
        let mut dst = Sample::default();
        let mut r = StateReader::new(&image, false).unwrap();
        dst.sync_state(&mut r);
        r.finish().unwrap();
        assert_eq!(dst, Sample::default());
    }
}
