/// Padmé padded-length computation.
///
/// Rounds `size` up so that the low `e - s` bits are clear, where
/// `e = floor(log2(size))` and `s = floor(log2(e)) + 1`. The overhead is
/// bounded by roughly `size / 2^s`, so relative overhead shrinks as payloads
/// grow — large objects are not padded proportionally more.
pub fn pad_to(size: u32) -> u32 {
    if size < 2 {
        return size;
    }
    let e = size.ilog2();
    let s = e.ilog2() + 1;
    if s >= e {
        return size;
    }
    let mask = (1u32 << (e - s)) - 1;
    (size + mask) & !mask
}
