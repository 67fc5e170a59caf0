//! Boundary towards the presentation layer that renders the browser.

use crate::browser::SlotId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusTarget {
    ConnectControl(SlotId),
    SettingsEditor(SlotId),
    DatabaseList(SlotId),
    ObjectList { slot: SlotId, database: String },
    QueryEditor { slot: SlotId, database: String },
}

pub trait Presenter {
    fn request_redraw(&mut self);

    fn focus(&mut self, target: FocusTarget);
}
