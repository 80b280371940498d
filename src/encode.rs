use super::{nesting::Nesting, outbuf::OutBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("Storage or payload of 4GB or more")]
    BufferTooLarge,

    #[error("Encoded output does not fit in the output storage")]
    BufferTooSmall,

    #[error("Arrays and maps nested too deeply")]
    NestingTooDeep,

    #[error("Too many items in a single array or map")]
    ArrayTooLong,

    #[error("Close with no open array or map")]
    TooManyCloses,

    #[error("Close does not match the open")]
    CloseMismatch,

    #[error("Finish with an array or map still open")]
    ArrayOrMapStillOpen,

    #[error("Simple values 24 through 31 are reserved")]
    BadSimple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MajorType {
    PositiveInt = 0,
    NegativeInt = 1,
    ByteString = 2,
    TextString = 3,
    Array = 4,
    Map = 5,
    Tag = 6,
    Simple = 7,
}

/// Minimum encoded width of a header argument. The encoder always picks
/// the smallest width that holds the value unless a larger one is asked
/// for, which floats need: a half with a zero significand still has to
/// serialize as 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Width {
    Immediate,
    One,
    Two,
    Four,
    Eight,
}

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;
const SIMPLE_UNDEF: u8 = 23;

pub const TAG_DATE_STRING: u64 = 0;
pub const TAG_DATE_EPOCH: u64 = 1;
pub const TAG_POSITIVE_BIGNUM: u64 = 2;
pub const TAG_NEGATIVE_BIGNUM: u64 = 3;
pub const TAG_URI: u64 = 32;

/// Encoder over a caller-owned buffer.
///
/// Errors are sticky: the first failure is latched, every later call is
/// a no-op, and the error surfaces from [`finish`](Self::finish). One
/// check at the end covers an arbitrarily long run of adds.
pub struct Encoder<'a> {
    out: OutBuf<'a>,
    nesting: Nesting,
    error: Option<Error>,
}

impl<'a> Encoder<'a> {
    pub fn new(storage: &'a mut [u8]) -> Self {
        // Frame start offsets are u32, so the whole output is too.
        let error = (storage.len() > u32::MAX as usize).then_some(Error::BufferTooLarge);
        Self {
            out: OutBuf::new(storage),
            nesting: Nesting::new(),
            error,
        }
    }

    /// Builds the initial byte plus big-endian argument and inserts it at
    /// `pos`, sliding everything after `pos` right. Appending a header is
    /// the `pos == end` case of the same operation.
    fn insert_type_and_number(&mut self, major: MajorType, min: Width, value: u64, pos: usize) {
        let initial = (major as u8) << 5;
        let mut header = [0u8; 9];
        let len = if value > u32::MAX as u64 || min >= Width::Eight {
            header[0] = initial | 27;
            header[1..9].copy_from_slice(&value.to_be_bytes());
            9
        } else if value > u16::MAX as u64 || min >= Width::Four {
            header[0] = initial | 26;
            header[1..5].copy_from_slice(&(value as u32).to_be_bytes());
            5
        } else if value > u8::MAX as u64 || min >= Width::Two {
            header[0] = initial | 25;
            header[1..3].copy_from_slice(&(value as u16).to_be_bytes());
            3
        } else if value >= 24 || min >= Width::One {
            header[0] = initial | 24;
            header[1] = value as u8;
            2
        } else {
            header[0] = initial | value as u8;
            1
        };
        self.out.insert(&header[..len], pos);
    }

    fn append_type_and_number(&mut self, major: MajorType, value: u64) {
        let end = self.out.end();
        self.insert_type_and_number(major, Width::Immediate, value, end);
    }

    fn count_one(&mut self) {
        if let Err(error) = self.nesting.increment(1) {
            self.error = Some(error);
        }
    }

    pub fn add_u64(&mut self, value: u64) {
        if self.error.is_some() {
            return;
        }
        self.append_type_and_number(MajorType::PositiveInt, value);
        self.count_one();
    }

    pub fn add_i64(&mut self, value: i64) {
        if self.error.is_some() {
            return;
        }
        if value < 0 {
            // CBOR stores -n as n-1 under the negative major type, which
            // is the bitwise complement. -1 encodes as argument 0.
            self.append_type_and_number(MajorType::NegativeInt, !(value as u64));
        } else {
            self.append_type_and_number(MajorType::PositiveInt, value as u64);
        }
        self.count_one();
    }

    fn add_buffer(&mut self, major: Option<MajorType>, bytes: &[u8]) {
        if self.error.is_some() {
            return;
        }
        if bytes.len() >= u32::MAX as usize {
            self.error = Some(Error::BufferTooLarge);
            return;
        }
        if let Some(major) = major {
            self.append_type_and_number(major, bytes.len() as u64);
        }
        self.out.append(bytes);
        self.count_one();
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.add_buffer(Some(MajorType::ByteString), bytes)
    }

    pub fn add_text(&mut self, text: &str) {
        self.add_buffer(Some(MajorType::TextString), text.as_bytes())
    }

    /// Splices already-encoded CBOR in verbatim, counting it as one item.
    pub fn add_encoded(&mut self, cbor: &[u8]) {
        self.add_buffer(None, cbor)
    }

    /// A tag prefixes the item that follows it and is not an item itself,
    /// so this does not bump the enclosing count. Always follow a tag
    /// with exactly one item.
    pub fn add_tag(&mut self, tag: u64) {
        if self.error.is_some() {
            return;
        }
        self.append_type_and_number(MajorType::Tag, tag);
    }

    /// Raw major type 7 entry point: simple values and float bit
    /// patterns, with the width chosen by the caller.
    pub fn add_type7(&mut self, width: Width, raw: u64) {
        if self.error.is_some() {
            return;
        }
        let end = self.out.end();
        self.insert_type_and_number(MajorType::Simple, width, raw, end);
        self.count_one();
    }

    pub fn add_simple(&mut self, value: u8) {
        if self.error.is_some() {
            return;
        }
        if (24..=31).contains(&value) {
            self.error = Some(Error::BadSimple);
            return;
        }
        self.add_type7(Width::Immediate, value as u64);
    }

    pub fn add_bool(&mut self, value: bool) {
        self.add_simple(if value { SIMPLE_TRUE } else { SIMPLE_FALSE });
    }

    pub fn add_null(&mut self) {
        self.add_simple(SIMPLE_NULL);
    }

    pub fn add_undefined(&mut self) {
        self.add_simple(SIMPLE_UNDEF);
    }

    pub fn add_f64(&mut self, value: f64) {
        let (width, bits) = shortest_double(value);
        self.add_type7(width, bits)
    }

    pub fn add_f32(&mut self, value: f32) {
        if let Some(half) = lossless_float_coerce::<half::f16>(value as f64) {
            self.add_type7(Width::Two, half.to_bits() as u64)
        } else {
            self.add_type7(Width::Four, value.to_bits() as u64)
        }
    }

    pub fn add_f16(&mut self, value: half::f16) {
        self.add_type7(Width::Two, value.to_bits() as u64)
    }

    pub fn add_date_string(&mut self, date: &str) {
        self.add_tag(TAG_DATE_STRING);
        self.add_text(date);
    }

    pub fn add_date_epoch(&mut self, seconds: i64) {
        self.add_tag(TAG_DATE_EPOCH);
        self.add_i64(seconds);
    }

    pub fn add_positive_bignum(&mut self, bytes: &[u8]) {
        self.add_tag(TAG_POSITIVE_BIGNUM);
        self.add_bytes(bytes);
    }

    pub fn add_negative_bignum(&mut self, bytes: &[u8]) {
        self.add_tag(TAG_NEGATIVE_BIGNUM);
        self.add_bytes(bytes);
    }

    pub fn add_uri(&mut self, uri: &str) {
        self.add_tag(TAG_URI);
        self.add_text(uri);
    }

    fn open(&mut self, major: MajorType) {
        if self.error.is_some() {
            return;
        }
        // The container is one item of the enclosing frame. Counting it
        // before the push means a failed push leaves the enclosing count
        // bumped, which the sticky error makes harmless.
        self.count_one();
        if self.error.is_some() {
            return;
        }
        let start = self.out.end() as u32;
        if let Err(error) = self.nesting.push(major, start) {
            self.error = Some(error);
        }
    }

    /// Nothing is emitted on open; the header is inserted at the recorded
    /// start offset on close, once the item count and payload length are
    /// known, sliding the payload right.
    fn close(&mut self, major: MajorType) -> Option<(usize, usize)> {
        if self.error.is_some() {
            return None;
        }
        if !self.nesting.in_nest() {
            self.error = Some(Error::TooManyCloses);
            return None;
        }
        if self.nesting.major_type() != major {
            self.error = Some(Error::CloseMismatch);
            return None;
        }
        let start = self.nesting.start_pos() as usize;
        let end = self.out.end();
        let argument = if major == MajorType::ByteString {
            // A bstr wrap is headed by its payload length in bytes.
            (end - start) as u64
        } else {
            self.nesting.count_for_header() as u64
        };
        self.insert_type_and_number(major, Width::Immediate, argument, start);
        self.nesting.pop();
        Some((start, self.out.end()))
    }

    pub fn open_array(&mut self) {
        self.open(MajorType::Array)
    }

    pub fn close_array(&mut self) {
        self.close(MajorType::Array);
    }

    pub fn open_map(&mut self) {
        self.open(MajorType::Map)
    }

    pub fn close_map(&mut self) {
        self.close(MajorType::Map);
    }

    /// Opens a byte string whose payload is itself encoded CBOR, built
    /// with the ordinary add calls. Used for content that gets hashed or
    /// signed in place, as COSE does.
    pub fn open_bstr_wrap(&mut self) {
        self.open(MajorType::ByteString)
    }

    /// Closes a bstr wrap and returns the wrapped region, header
    /// included. The slice borrows the encoder, so it must be read
    /// before the next operation moves the bytes out from under it.
    pub fn close_bstr_wrap(&mut self) -> &[u8] {
        match self.close(MajorType::ByteString) {
            Some((start, end)) => &self.out.as_slice()[start..end],
            None => &[],
        }
    }

    /// The first latched error wins, then an unbalanced open, then an
    /// output that did not fit.
    pub fn finish(self) -> Result<&'a [u8], Error> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.nesting.in_nest() {
            return Err(Error::ArrayOrMapStillOpen);
        }
        if self.out.overflowed() {
            return Err(Error::BufferTooSmall);
        }
        Ok(self.out.into_slice())
    }

    pub fn finish_len(self) -> Result<usize, Error> {
        self.finish().map(|encoded| encoded.len())
    }

    pub fn emit<T>(&mut self, value: &T)
    where
        T: ToCbor + ?Sized,
    {
        value.to_cbor(self)
    }

    pub fn emit_tagged<T, I, U>(&mut self, value: &T, tags: I)
    where
        T: ToCbor + ?Sized,
        I: IntoIterator<Item = U>,
        U: num_traits::ToPrimitive,
    {
        for tag in tags {
            self.add_tag(tag.to_u64().expect("Tags must be unsigned integers"));
        }
        self.emit(value)
    }
}

fn lossless_float_coerce<T>(value: f64) -> Option<T>
where
    T: num_traits::FromPrimitive + Into<f64> + Copy,
{
    match T::from_f64(value) {
        Some(coerced) if <T as Into<f64>>::into(coerced) == value => Some(coerced),
        _ => None,
    }
}

/// Reduces a double to the narrowest width that round-trips exactly.
/// NaN never compares equal to itself, so NaN payloads keep their
/// original width.
fn shortest_double(value: f64) -> (Width, u64) {
    if let Some(half) = lossless_float_coerce::<half::f16>(value) {
        (Width::Two, half.to_bits() as u64)
    } else if let Some(single) = lossless_float_coerce::<f32>(value) {
        (Width::Four, single.to_bits() as u64)
    } else {
        (Width::Eight, value.to_bits())
    }
}

pub trait ToCbor {
    fn to_cbor(&self, encoder: &mut Encoder);
}

/// Byte-string newtype. A bare `[u8]` would be ambiguous between a byte
/// string and an array of small integers, so byte strings are explicit.
pub struct Bytes<'a>(pub &'a [u8]);

impl ToCbor for Bytes<'_> {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_bytes(self.0)
    }
}

impl<T> ToCbor for &T
where
    T: ToCbor + ?Sized,
{
    fn to_cbor(&self, encoder: &mut Encoder) {
        (**self).to_cbor(encoder)
    }
}

macro_rules! to_cbor_unsigned {
    ($($t:ty),+) => {$(
        impl ToCbor for $t {
            fn to_cbor(&self, encoder: &mut Encoder) {
                encoder.add_u64(*self as u64)
            }
        }
    )+}
}

to_cbor_unsigned!(u8, u16, u32, usize);

impl ToCbor for u64 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_u64(*self)
    }
}

macro_rules! to_cbor_signed {
    ($($t:ty),+) => {$(
        impl ToCbor for $t {
            fn to_cbor(&self, encoder: &mut Encoder) {
                encoder.add_i64(*self as i64)
            }
        }
    )+}
}

to_cbor_signed!(i8, i16, i32, isize);

impl ToCbor for i64 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_i64(*self)
    }
}

impl ToCbor for bool {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_bool(*self)
    }
}

impl ToCbor for f64 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_f64(*self)
    }
}

impl ToCbor for f32 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_f32(*self)
    }
}

impl ToCbor for half::f16 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_f16(*self)
    }
}

impl ToCbor for str {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.add_text(self)
    }
}

impl<T> ToCbor for Option<T>
where
    T: ToCbor,
{
    fn to_cbor(&self, encoder: &mut Encoder) {
        match self {
            Some(value) => value.to_cbor(encoder),
            None => encoder.add_undefined(),
        }
    }
}

impl<T> ToCbor for [T]
where
    T: ToCbor,
{
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.open_array();
        for item in self {
            item.to_cbor(encoder);
        }
        encoder.close_array();
    }
}

impl<T, const N: usize> ToCbor for [T; N]
where
    T: ToCbor,
{
    fn to_cbor(&self, encoder: &mut Encoder) {
        self.as_slice().to_cbor(encoder)
    }
}

macro_rules! to_cbor_tuple {
    ($(($($idx:tt $name:ident),+))+) => {$(
        impl<$($name: ToCbor),+> ToCbor for ($($name,)+) {
            fn to_cbor(&self, encoder: &mut Encoder) {
                encoder.open_array();
                $(self.$idx.to_cbor(encoder);)+
                encoder.close_array();
            }
        }
    )+}
}

to_cbor_tuple! {
    (0 A)
    (0 A, 1 B)
    (0 A, 1 B, 2 C)
    (0 A, 1 B, 2 C, 3 D)
    (0 A, 1 B, 2 C, 3 D, 4 E)
    (0 A, 1 B, 2 C, 3 D, 4 E, 5 F)
}
