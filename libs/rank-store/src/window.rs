//! Around-window arithmetic shared by the Lua procedures and the in-memory store

/// Inclusive 0-based bounds of the window around `rank` in a structure of
/// `count` members, `distance` entries on each side.
///
/// With `fill_borders`, a window that runs past either end is shifted back
/// so it still holds `2 * distance + 1` entries when the structure has that
/// many. Returns `None` when `rank` is outside the structure.
pub fn around_window(rank: u64, count: u64, distance: u64, fill_borders: bool) -> Option<(u64, u64)> {
    if rank >= count {
        return None;
    }

    let last = count - 1;
    let mut low = rank.saturating_sub(distance);
    let mut high = rank.saturating_add(distance).min(last);

    if fill_borders {
        let span = distance.saturating_mul(2);
        if rank < distance {
            high = low.saturating_add(span).min(last);
        }
        if rank.saturating_add(distance) > last {
            low = high.saturating_sub(span);
        }
    }

    Some((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_in_the_middle() {
        assert_eq!(around_window(5, 10, 2, false), Some((3, 7)));
        assert_eq!(around_window(5, 10, 2, true), Some((3, 7)));
    }

    #[test]
    fn test_window_clipped_without_fill() {
        assert_eq!(around_window(0, 10, 2, false), Some((0, 2)));
        assert_eq!(around_window(9, 10, 2, false), Some((7, 9)));
    }

    #[test]
    fn test_window_filled_at_borders() {
        assert_eq!(around_window(0, 10, 2, true), Some((0, 4)));
        assert_eq!(around_window(1, 10, 2, true), Some((0, 4)));
        assert_eq!(around_window(9, 10, 2, true), Some((5, 9)));
    }

    #[test]
    fn test_window_larger_than_structure() {
        assert_eq!(around_window(1, 4, 5, true), Some((0, 3)));
        assert_eq!(around_window(1, 4, 5, false), Some((0, 3)));
    }

    #[test]
    fn test_window_zero_distance() {
        assert_eq!(around_window(3, 10, 0, true), Some((3, 3)));
    }

    #[test]
    fn test_window_out_of_range() {
        assert_eq!(around_window(0, 0, 1, false), None);
        assert_eq!(around_window(4, 4, 1, true), None);
    }
}
