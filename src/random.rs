/// Seeded random value generation for test cases.
///
/// The generator is process-wide and must be initialized exactly once at
/// startup, before any test runs. With `CODECRAFTERS_RANDOM_SEED` set,
/// re-initializing with the same seed reproduces the same value sequence.
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

static RNG: OnceLock<Mutex<Option<StdRng>>> = OnceLock::new();

const RANDOM_WORDS: [&str; 10] = [
    "apple",
    "orange",
    "banana",
    "pear",
    "grape",
    "pineapple",
    "mango",
    "strawberry",
    "raspberry",
    "blueberry",
];

fn cell() -> &'static Mutex<Option<StdRng>> {
    RNG.get_or_init(|| Mutex::new(None))
}

fn rng() -> MutexGuard<'static, Option<StdRng>> {
    let guard = cell().lock().unwrap();
    if guard.is_none() {
        panic!("random::init must be called before generating random values");
    }
    guard
}

/// Initializes the random subsystem.
///
/// If `CODECRAFTERS_RANDOM_SEED` is set it is used as the seed, making every
/// generated value reproducible. A non-integer seed is fatal.
pub fn init() {
    let seed = match std::env::var("CODECRAFTERS_RANDOM_SEED") {
        Ok(value) => value
            .parse::<i64>()
            .unwrap_or_else(|err| panic!("invalid CODECRAFTERS_RANDOM_SEED {:?}: {}", value, err))
            as u64,
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as u64,
    };

    *cell().lock().unwrap() = Some(StdRng::seed_from_u64(seed));
}

/// Returns a random integer in `[min, max)`.
pub fn random_int(min: i64, max: i64) -> i64 {
    rng().as_mut().unwrap().gen_range(min..max)
}

/// Returns `count` unique random integers in `[min, max)`.
///
/// Panics if `count` exceeds the range of possible values.
pub fn random_ints(min: i64, max: i64, count: usize) -> Vec<i64> {
    if count as i64 > max - min {
        panic!("can't generate more unique random integers than the range of possible values");
    }

    let mut values: Vec<i64> = Vec::with_capacity(count);
    while values.len() < count {
        let candidate = random_int(min, max);
        if !values.contains(&candidate) {
            values.push(candidate);
        }
    }

    values
}

/// Returns a random word.
pub fn random_word() -> String {
    let index = rng().as_mut().unwrap().gen_range(0..RANDOM_WORDS.len());
    RANDOM_WORDS[index].to_string()
}

/// Returns `n` unique random words.
pub fn random_words(n: usize) -> Vec<String> {
    random_elements_from_slice(
        &RANDOM_WORDS.map(str::to_string),
        n,
    )
}

/// Returns a random string of 6 words.
pub fn random_string() -> String {
    random_words(6).join(" ")
}

/// Returns `n` random strings.
pub fn random_strings(n: usize) -> Vec<String> {
    (0..n).map(|_| random_string()).collect()
}

/// Returns one random element of `slice`.
pub fn random_element_from_slice<T: Clone>(slice: &[T]) -> T {
    random_elements_from_slice(slice, 1).remove(0)
}

/// Returns `count` elements of `slice` picked at random without repetition.
/// If `count` exceeds the slice length the slice is conceptually repeated.
pub fn random_elements_from_slice<T: Clone>(slice: &[T], count: usize) -> Vec<T> {
    let mut pool: Vec<T> = slice.to_vec();
    while count > pool.len() {
        pool.extend_from_slice(slice);
    }

    let mut indices: Vec<usize> = (0..pool.len()).collect();
    indices.shuffle(rng().as_mut().unwrap());

    indices
        .into_iter()
        .take(count)
        .map(|i| pool[i].clone())
        .collect()
}

/// Returns the elements of `slice` in random order.
pub fn shuffle<T: Clone>(slice: &[T]) -> Vec<T> {
    random_elements_from_slice(slice, slice.len())
}
