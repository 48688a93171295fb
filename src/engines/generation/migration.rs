use crate::engines::generation::member::PopMember;
use crate::engines::generation::population::Population;
use rand::seq::index::sample;
use rand::Rng;

/// Number of slots replaced when migrating fraction `frac` into a
/// population of `size`: `round(frac * size)`, capped at `size`.
pub fn migration_count(frac: f64, size: usize) -> usize {
    ((frac * size as f64).round().max(0.0) as usize).min(size)
}

/// Replace a random `frac` of `population` with copies of members drawn
/// from `migrants`. Target slots are distinct; migrants are drawn with
/// replacement and get a fresh birth stamp. Returns the number of slots
/// replaced.
pub fn migrate<R: Rng + ?Sized>(
    migrants: &[PopMember],
    population: &mut Population,
    frac: f64,
    deterministic: bool,
    rng: &mut R,
) -> usize {
    if migrants.is_empty() || population.is_empty() {
        return 0;
    }
    let count = migration_count(frac, population.len());
    if count == 0 {
        return 0;
    }
    let slots = sample(rng, population.len(), count);
    for slot in slots.iter() {
        let donor = &migrants[rng.gen_range(0..migrants.len())];
        population.members[slot] = donor.reborn(deterministic);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_count_rounds() {
        assert_eq!(migration_count(0.25, 10), 3);
        assert_eq!(migration_count(0.24, 10), 2);
        assert_eq!(migration_count(0.0, 10), 0);
        assert_eq!(migration_count(2.0, 10), 10);
    }
}
