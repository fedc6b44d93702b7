//! A byte buffer that's either borrowed or owned, so the `Database` trait
//! can hand back zero-copy views from an in-memory backend while still
//! working uniformly with backends (rocksdb) that must copy out of their
//! own buffers.

use std::borrow::Cow;
use std::ops::Deref;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slice<'a>(Cow<'a, [u8]>);

impl<'a> Slice<'a> {
    #[must_use]
    pub fn into_boxed(self) -> Box<[u8]> {
        self.0.into_owned().into_boxed_slice()
    }

    #[must_use]
    pub fn into_owned(self) -> Slice<'static> {
        Slice(Cow::Owned(self.0.into_owned()))
    }
}

impl Deref for Slice<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Slice<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for Slice<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self(Cow::Borrowed(bytes))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Slice<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self(Cow::Borrowed(bytes.as_slice()))
    }
}

impl From<Vec<u8>> for Slice<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Cow::Owned(bytes))
    }
}

impl From<Box<[u8]>> for Slice<'static> {
    fn from(bytes: Box<[u8]>) -> Self {
        Self(Cow::Owned(bytes.into_vec()))
    }
}

impl<'a> From<&'a Slice<'a>> for Slice<'a> {
    fn from(slice: &'a Slice<'a>) -> Self {
        Self(Cow::Borrowed(&slice.0))
    }
}
