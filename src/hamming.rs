/// 感知哈希的位数，编码为 64 个十六进制字符
pub const HASH_BITS: u32 = 256;

/// 十六进制编码后的哈希长度
pub const HASH_HEX_LEN: usize = HASH_BITS as usize / 4;

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

#[inline(always)]
pub fn hamming_256(va: &[u8; 32], vb: &[u8; 32]) -> u32 {
    let va: [u64; 4] = bytemuck::cast(*va);
    let vb: [u64; 4] = bytemuck::cast(*vb);
    (va[0] ^ vb[0]).count_ones()
        + (va[1] ^ vb[1]).count_ones()
        + (va[2] ^ vb[2]).count_ones()
        + (va[3] ^ vb[3]).count_ones()
}

/// 计算两个十六进制哈希的汉明距离，返回 (距离, 总位数)
///
/// 长度不一致、为空或不是合法十六进制时返回 None
pub fn hex_distance(a: &str, b: &str) -> Option<(u32, u32)> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    if a.len() == HASH_HEX_LEN {
        let mut va = [0u8; 32];
        let mut vb = [0u8; 32];
        hex::decode_to_slice(a, &mut va).ok()?;
        hex::decode_to_slice(b, &mut vb).ok()?;
        return Some((hamming_256(&va, &vb), HASH_BITS));
    }
    let va = hex::decode(a).ok()?;
    let vb = hex::decode(b).ok()?;
    Some((hamming_naive(&va, &vb), va.len() as u32 * 8))
}

/// 汉明距离，任意一方缺失或无法比较时返回最大距离
pub fn hamming_distance(a: Option<&str>, b: Option<&str>) -> u32 {
    match (a, b) {
        (Some(a), Some(b)) => hex_distance(a, b).map_or(HASH_BITS, |(d, _)| d),
        _ => HASH_BITS,
    }
}

/// pHash 相似度：1 - 距离 / 总位数，无法比较时为 0
pub fn phash_score(a: Option<&str>, b: Option<&str>) -> f32 {
    let Some((d, bits)) = a.zip(b).and_then(|(a, b)| hex_distance(a, b)) else {
        return 0.;
    };
    1. - d as f32 / bits as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "0000000000000000000000000000000000000000000000000000000000000000";
    const FULL: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

    #[test]
    fn test_hamming_identical() {
        let va = [0u8; 32];
        let vb = [0u8; 32];
        assert_eq!(hamming_256(&va, &vb), 0);
        assert_eq!(hamming_distance(Some(FULL), Some(FULL)), 0);
    }

    #[test]
    fn test_hamming_all_different() {
        let va = [0u8; 32];
        let vb = [255u8; 32];
        assert_eq!(hamming_256(&va, &vb), 256);
        assert_eq!(hamming_distance(Some(ZERO), Some(FULL)), 256);
        assert_eq!(phash_score(Some(ZERO), Some(FULL)), 0.);
    }

    #[test]
    fn test_hamming_single_bit() {
        let mut one = ZERO.to_string();
        one.replace_range(63..64, "1");
        assert_eq!(hamming_distance(Some(ZERO), Some(&one)), 1);
        assert_eq!(hamming_distance(Some(&one), Some(ZERO)), 1);
        assert_eq!(hamming_naive(&[0], &[1]), 1);
    }

    #[test]
    fn test_hamming_mismatch_is_max() {
        assert_eq!(hamming_distance(Some(ZERO), Some("00")), HASH_BITS);
        assert_eq!(hamming_distance(None, Some(ZERO)), HASH_BITS);
        assert_eq!(hamming_distance(Some(""), Some("")), HASH_BITS);
        assert_eq!(hamming_distance(Some(&ZERO.replace('0', "z")), Some(ZERO)), HASH_BITS);
        assert_eq!(phash_score(Some(ZERO), None), 0.);
    }

    #[test]
    fn test_hamming_short_hash() {
        assert_eq!(hex_distance("0f", "00"), Some((4, 8)));
        assert_eq!(phash_score(Some("0f"), Some("00")), 0.5);
    }

    #[test]
    fn test_phash_score_decreasing() {
        let mut prev = 1.1;
        let mut hash = ZERO.to_string();
        assert_eq!(phash_score(Some(ZERO), Some(&hash)), 1.);
        for i in 0..HASH_HEX_LEN {
            let score = phash_score(Some(ZERO), Some(&hash));
            assert!(score < prev);
            assert!((0. ..=1.).contains(&score));
            prev = score;
            hash.replace_range(i..i + 1, "1");
        }
    }
}
