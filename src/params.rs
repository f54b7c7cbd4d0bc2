use std::mem::size_of;

/// The parameters for an Equihash instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    pub(crate) n: u32,
    pub(crate) k: u32,
}

impl Params {
    /// Returns `None` if the parameters are invalid.
    pub fn new(n: u32, k: u32) -> Option<Self> {
        // We place the following requirements on the parameters:
        // - n is a multiple of 8, so the hash output has an exact byte length.
        // - k >= 3, so solutions contain at least eight indices.
        // - k < n, so the collision bit length is at least 1.
        // - n is a multiple of k + 1, so we have an integer collision bit length.
        // - the index bit length is in 8..32, so a truncated index fits in a
        //   single byte and the initial list size fits in a u32.
        if (n % 8 == 0)
            && (k >= 3)
            && (k < n)
            && (n % (k + 1) == 0)
            && (n / (k + 1) + 1 >= 8)
            && (n / (k + 1) + 1 < 32)
        {
            Some(Params { n, k })
        } else {
            None
        }
    }

    pub(crate) fn collision_bit_length(&self) -> usize {
        (self.n / (self.k + 1)) as usize
    }

    pub(crate) fn collision_byte_length(&self) -> usize {
        (self.collision_bit_length() + 7) / 8
    }

    /// The length of the expanded hash region of each row: one collision
    /// block per tree level.
    pub(crate) fn hash_length(&self) -> usize {
        ((self.k as usize) + 1) * self.collision_byte_length()
    }

    /// The number of bits of an index that are meaningful: indices into the
    /// initial list occupy the half-open range `0..2^(index_bit_length)`.
    pub(crate) fn index_bit_length(&self) -> usize {
        self.collision_bit_length() + 1
    }

    pub(crate) fn init_size(&self) -> u32 {
        1 << self.index_bit_length()
    }

    pub(crate) fn solution_size(&self) -> usize {
        1 << self.k
    }

    /// How many full indices share a given truncated index.
    pub(crate) fn recreation_size(&self) -> u32 {
        1 << (self.index_bit_length() - 8)
    }

    /// Trail length in bytes of a full row holding a complete solution.
    pub(crate) fn solution_trail_length(&self) -> usize {
        size_of::<u32>() * self.solution_size()
    }
}
