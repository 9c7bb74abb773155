/// Borrowed read-only f32 volume, e.g. a view into an image loader's buffer.
#[derive(Clone, Copy, Debug)]
pub struct VolumeRef<'a> {
    pub w: usize,
    pub h: usize,
    pub d: usize,
    pub data: &'a [f32],
}

impl<'a> VolumeRef<'a> {
    /// Wrap `data`; `None` if its length does not match the dimensions.
    pub fn new(dims: [usize; 3], data: &'a [f32]) -> Option<Self> {
        let [w, h, d] = dims;
        (w * h * d == data.len()).then_some(Self { w, h, d, data })
    }
}

impl<'a> crate::image::traits::VolumeView for VolumeRef<'a> {
    type Voxel = f32;

    #[inline]
    fn width(&self) -> usize {
        self.w
    }
    #[inline]
    fn height(&self) -> usize {
        self.h
    }
    #[inline]
    fn depth(&self) -> usize {
        self.d
    }
    #[inline]
    fn row(&self, y: usize, z: usize) -> &[f32] {
        let start = (z * self.h + y) * self.w;
        &self.data[start..start + self.w]
    }
}
