//! 전송 코드 (shared secret) 생성
//!
//! `<형용사어근><명사어근>-<형용사어근><명사어근>-<4자리 숫자>` 형태.
//! 예: `boldriver-quietlamp-4821`
//!
//! 호출마다 `thread_rng` 에서 독립적으로 샘플링한다.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::{Error, Result};

/// 첫번째 어근 풀 (형용사)
const PREFIX_ROOTS: &[&str] = &[
    "act", "big", "bold", "bright", "calm", "clear", "cool", "dark", "deep", "easy", "fast",
    "fine", "flat", "free", "full", "good", "grand", "great", "green", "hard", "high", "hot",
    "huge", "kind", "large", "late", "light", "long", "loud", "low", "main", "new", "nice",
    "old", "open", "plain", "pure", "quick", "quiet", "rare", "real", "rich", "round", "safe",
    "sharp", "slow", "soft", "square", "still", "sweet", "thick", "thin", "tight", "true",
    "vast", "warm", "white", "wild", "wise", "young",
];

/// 두번째 어근 풀 (명사)
const SUFFIX_ROOTS: &[&str] = &[
    "art", "ball", "band", "bank", "base", "bell", "bird", "boat", "book", "box", "camp",
    "card", "cat", "chair", "city", "cloud", "coat", "coin", "copper", "corn", "cotton",
    "crown", "cup", "dance", "deer", "door", "dream", "drum", "duck", "earth", "edge",
    "engine", "farm", "field", "fire", "fish", "flag", "flower", "forest", "fountain", "fox",
    "fruit", "garden", "gate", "gift", "glass", "gold", "grass", "hill", "home", "horn",
    "horse", "house", "iron", "island", "jar", "jet", "key", "king", "kite", "lake", "lamp",
    "leaf", "lion", "lock", "map", "mask", "meadow", "milk", "mirror", "moon", "mountain",
    "music", "night", "north", "ocean", "orange", "paper", "park", "pencil", "pilot", "pipe",
    "plane", "plant", "pond", "queen", "rain", "ray", "ring", "river", "road", "rock", "roof",
    "rose", "salt", "sand", "sea", "seed", "shade", "ship", "shoe", "silk", "silver", "sky",
    "snow", "song", "sound", "space", "spring", "stamp", "star", "steam", "stone", "storm",
    "street", "sugar", "summer", "table", "tail", "tower", "town", "train", "tree", "trip",
    "truck", "valley", "voice", "wall", "water", "wave", "wheel", "wind", "window", "wing",
    "winter", "wire", "wood", "world", "year",
];

/// 숫자 접미사 범위
const SUFFIX_MIN: u32 = 1000;
const SUFFIX_MAX: u32 = 9999;

/// 새 전송 코드 생성
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();

    let word1 = compound_word(&mut rng);
    let word2 = compound_word(&mut rng);
    let number = rng.gen_range(SUFFIX_MIN..=SUFFIX_MAX);

    format!("{}-{}-{}", word1, word2, number)
}

fn compound_word<R: Rng + ?Sized>(rng: &mut R) -> String {
    let first = PREFIX_ROOTS.choose(rng).copied().unwrap_or("quick");
    let second = SUFFIX_ROOTS.choose(rng).copied().unwrap_or("fox");
    format!("{}{}", first, second)
}

/// 사용자가 입력한 코드 정리 및 검증
///
/// 앞뒤 공백 제거. 비어 있거나 중간에 공백이 있으면 `Error::Validation`.
pub fn normalize_code(code: &str) -> Result<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("전송 코드가 비어 있음".into()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("전송 코드에 공백 포함: {:?}", trimmed)));
    }
    Ok(trimmed.to_string())
}
