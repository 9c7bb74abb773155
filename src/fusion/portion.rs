/// Contiguous run of output voxels in cursor (x-fastest) order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImagePortion {
    pub start: usize,
    pub len: usize,
}

impl ImagePortion {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Split `total` voxels into `n` contiguous portions of equal size; the
/// remainder goes to the last one.
pub fn divide_into_portions(total: usize, n: usize) -> Vec<ImagePortion> {
    let n = n.max(1);
    let size = total / n;
    (0..n)
        .map(|i| {
            let start = i * size;
            let len = if i + 1 == n { total - start } else { size };
            ImagePortion { start, len }
        })
        .collect()
}

/// Cut `data` into disjoint mutable slices matching `portions`.
///
/// Portions must be sorted, contiguous and start at 0.
pub fn split_portions<'a, T>(mut data: &'a mut [T], portions: &[ImagePortion]) -> Vec<&'a mut [T]> {
    let mut out = Vec::with_capacity(portions.len());
    for p in portions {
        let (head, tail) = std::mem::take(&mut data).split_at_mut(p.len);
        out.push(head);
        data = tail;
    }
    out
}
