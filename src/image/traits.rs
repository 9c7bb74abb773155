/// Read access to a dense 3-D volume stored x-fastest, then y, then z.
pub trait VolumeView {
    type Voxel: Copy;

    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn depth(&self) -> usize;

    /// One x-row of the plane `z`.
    fn row(&self, y: usize, z: usize) -> &[Self::Voxel];

    #[inline]
    fn dims(&self) -> [usize; 3] {
        [self.width(), self.height(), self.depth()]
    }

    #[inline]
    fn get(&self, x: usize, y: usize, z: usize) -> Self::Voxel {
        self.row(y, z)[x]
    }

    fn rows(&self) -> Rows<'_, Self>
    where
        Self: Sized,
    {
        Rows {
            volume: self,
            y: 0,
            z: 0,
        }
    }
}

/// Iterator over all x-rows, plane by plane.
pub struct Rows<'a, V: ?Sized + VolumeView> {
    volume: &'a V,
    y: usize,
    z: usize,
}

impl<'a, V: VolumeView> Iterator for Rows<'a, V> {
    type Item = &'a [V::Voxel];

    fn next(&mut self) -> Option<Self::Item> {
        if self.volume.height() == 0 || self.z >= self.volume.depth() {
            return None;
        }
        let (y, z) = (self.y, self.z);
        self.y += 1;
        if self.y == self.volume.height() {
            self.y = 0;
            self.z += 1;
        }
        Some(self.volume.row(y, z))
    }
}
