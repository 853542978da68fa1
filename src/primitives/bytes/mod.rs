#![forbid(unsafe_code)]
//! Order-preserving encoders and byte-range helpers shared by key codecs.

pub mod ord {
    //! Order-preserving encoders for integer and text key components.

    use core::convert::TryInto;

    const I64_LEN: usize = core::mem::size_of::<i64>();
    const SIGN_BIT: u64 = 1 << 63;
    const TERMINATOR: u8 = 0x00;
    const ESCAPE: u8 = 0xFF;

    /// Appends a signed i64 with its sign bit flipped so that byte order
    /// matches numeric order.
    pub fn push_i64(out: &mut Vec<u8>, v: i64) {
        let flipped = (v as u64) ^ SIGN_BIT;
        out.extend_from_slice(&flipped.to_be_bytes());
    }

    /// Decodes an i64 written by [`push_i64`] from the head of `src`.
    pub fn read_i64(src: &[u8]) -> Option<i64> {
        let head: [u8; I64_LEN] = src.get(..I64_LEN)?.try_into().ok()?;
        Some((u64::from_be_bytes(head) ^ SIGN_BIT) as i64)
    }

    /// Appends `bytes` followed by a `0x00` terminator, escaping embedded
    /// zero bytes as `0x00 0xFF` so shorter strings sort first.
    pub fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
        for &b in bytes {
            out.push(b);
            if b == TERMINATOR {
                out.push(ESCAPE);
            }
        }
        out.push(TERMINATOR);
    }

    /// Splits an escaped, terminated byte string off the head of `src`,
    /// returning the unescaped body and the number of bytes consumed.
    pub fn split_escaped(src: &[u8]) -> Option<(Vec<u8>, usize)> {
        let mut body = Vec::new();
        let mut idx = 0;
        while idx < src.len() {
            let b = src[idx];
            if b == TERMINATOR {
                if src.get(idx + 1) == Some(&ESCAPE) {
                    body.push(TERMINATOR);
                    idx += 2;
                    continue;
                }
                return Some((body, idx + 1));
            }
            body.push(b);
            idx += 1;
        }
        None
    }
}

/// Returns the smallest byte string greater than every string starting with
/// `prefix`, or `None` when no such bound exists (empty or all `0xFF`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
