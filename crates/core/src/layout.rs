/// Widths of the two panes of a split view.
///
/// The left pane gets its preferred width but never more than half of `total`, and
/// collapses to nothing when side bars are hidden.
#[must_use]
pub fn split_widths(total: u16, preferred_left: u16, hide_side_bars: bool) -> [u16; 2] {
    if hide_side_bars {
        return [0, total];
    }
    let left = preferred_left.min(total / 2);
    [left, total - left]
}
