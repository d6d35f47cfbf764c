/// Adaptive per-lane DC offset removal for raw IQ buffers.
///
/// A hardware buffer is walked in strides of `LANES` raw elements (four
/// complex samples: I,Q,I,Q,I,Q,I,Q). Each lane keeps its own running
/// offset, updated as an exponential moving average of the lane mean:
///   offset = mean * coeff + offset * (1 - coeff)
/// The engine works directly on byte buffers so the same routine serves
/// CS8, CS16 and CF32 streams; the element type is fixed once per stream.

/// Number of raw elements in one processing stride.
pub const LANES: usize = 8;

/// Coefficient used on the first buffer after activation (full lock-on).
pub const LOCK_COEFF: f32 = 1.0;

/// Coefficient used for periodic drift tracking while streaming.
pub const TRACK_COEFF: f32 = 0.1;

/// Offsets are re-estimated only on buffers whose sequence counter has
/// these bits clear (every 16th buffer).
pub const RECAL_MASK: u32 = 0xF;

/// A raw sample element the DC engine can operate on.
pub trait DcSample: Copy + Default + Send + 'static {
    /// Width of one element in bytes
    const WIDTH: usize;

    /// Decode one element from native-endian bytes (`bytes.len() == WIDTH`).
    fn read(bytes: &[u8]) -> Self;

    /// Encode one element into native-endian bytes.
    fn write(self, bytes: &mut [u8]);

    fn to_f32(self) -> f32;

    fn from_f32(v: f32) -> Self;

    /// Subtract an offset. Integer types saturate at their range limits.
    fn remove(self, offset: Self) -> Self;
}

macro_rules! impl_int_sample {
    ($t:ty) => {
        impl DcSample for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();

            #[inline]
            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            #[inline]
            fn write(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }

            #[inline]
            fn from_f32(v: f32) -> Self {
                v as $t
            }

            #[inline]
            fn remove(self, offset: Self) -> Self {
                self.saturating_sub(offset)
            }
        }
    };
}

impl_int_sample!(i8);
impl_int_sample!(i16);

impl DcSample for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        f32::from_ne_bytes(raw)
    }

    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_ne_bytes());
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline]
    fn remove(self, offset: Self) -> Self {
        self - offset
    }
}

/// Per-channel DC offset state stored at the precision of the stream format.
#[derive(Debug, Clone, Copy)]
pub struct DcOffset<T: DcSample> {
    offsets: [T; LANES],
}

impl<T: DcSample> Default for DcOffset<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DcSample> DcOffset<T> {
    pub fn new() -> Self {
        Self {
            offsets: [T::default(); LANES],
        }
    }

    /// Current per-lane offsets
    pub fn offsets(&self) -> [T; LANES] {
        self.offsets
    }

    /// Estimate lane means over `raw` and fold them into the running offsets.
    ///
    /// Trailing elements that do not fill a whole stride are ignored; an
    /// empty buffer leaves the state untouched.
    pub fn measure(&mut self, raw: &[u8], coeff: f32) {
        let stride = T::WIDTH * LANES;
        let strides = raw.len() / stride;
        if strides == 0 {
            return;
        }

        let mut accum = [0f32; LANES];
        for chunk in raw.chunks_exact(stride) {
            for (lane, elem) in chunk.chunks_exact(T::WIDTH).enumerate() {
                accum[lane] += T::read(elem).to_f32();
            }
        }

        // accum / (n / LANES) == lane mean
        let f = LANES as f32 / (strides * LANES) as f32;
        for (offset, acc) in self.offsets.iter_mut().zip(accum.iter()) {
            let mean = acc * f;
            *offset = T::from_f32(mean * coeff + offset.to_f32() * (1.0 - coeff));
        }
    }

    /// Subtract the lane offsets from every element of `buf`, in place.
    pub fn apply(&self, buf: &mut [u8]) {
        let stride = T::WIDTH * LANES;
        for chunk in buf.chunks_exact_mut(stride) {
            for (lane, elem) in chunk.chunks_exact_mut(T::WIDTH).enumerate() {
                T::read(elem).remove(self.offsets[lane]).write(elem);
            }
        }
    }
}

/// Format-erased view of a channel's DC engine, chosen once at stream setup.
pub trait DcCorrector: Send {
    fn measure(&mut self, raw: &[u8], coeff: f32);

    fn apply(&self, buf: &mut [u8]);

    fn lane_offsets(&self) -> [f32; LANES];
}

impl<T: DcSample> DcCorrector for DcOffset<T> {
    fn measure(&mut self, raw: &[u8], coeff: f32) {
        DcOffset::measure(self, raw, coeff);
    }

    fn apply(&self, buf: &mut [u8]) {
        DcOffset::apply(self, buf);
    }

    fn lane_offsets(&self) -> [f32; LANES] {
        self.offsets.map(DcSample::to_f32)
    }
}

/// Should the offset estimate be refreshed on a buffer with this sequence counter?
#[inline]
pub fn is_recal_point(sequence: u32) -> bool {
    sequence & RECAL_MASK == 0
}
