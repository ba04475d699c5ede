//! Popup management
//!
//! Popups are placed relative to their parent (a toplevel or another popup)
//! and may take an explicit grab. Grabbing popups form a stack; dismissing a
//! popup dismisses every popup above it first.

use std::collections::HashMap;

use log::debug;

use crate::compositor::configure::ConfigureTracker;
use crate::compositor::geometry::Rectangle;
use crate::compositor::SurfaceId;
use crate::protocol::shell::XdgPositioner;

/// What the compositor proposes to a popup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PopupConfigure {
    /// Geometry relative to the parent's window geometry
    pub geometry: Rectangle,
    /// Token from the reposition request this configure answers
    pub reposition_token: Option<u32>,
}

/// A popup surface
#[derive(Debug)]
pub struct Popup {
    /// Associated surface
    pub surface_id: SurfaceId,
    /// Parent surface (toplevel or popup)
    pub parent: SurfaceId,
    /// Positioner the popup was last placed with
    pub positioner: XdgPositioner,
    /// Configure/ack handshake
    pub configure: ConfigureTracker<PopupConfigure>,
    /// Pending window geometry from xdg_surface.set_window_geometry
    pub pending_geometry: Option<Rectangle>,
    /// Visible bounds inside the surface
    pub geometry: Option<Rectangle>,
    /// Whether the popup holds an explicit grab
    pub grabbed: bool,
    pub mapped: bool,
    /// popup_done was sent; the popup is no longer shown
    pub dismissed: bool,
}

impl Popup {
    pub fn new(surface_id: SurfaceId, parent: SurfaceId, positioner: XdgPositioner) -> Self {
        Self {
            surface_id,
            parent,
            positioner,
            configure: ConfigureTracker::new(),
            pending_geometry: None,
            geometry: None,
            grabbed: false,
            mapped: false,
            dismissed: false,
        }
    }

    /// Placement proposed by the most recent configure
    pub fn placement(&self) -> Rectangle {
        self.configure
            .current()
            .or(self.configure.latest_sent())
            .map(|c| c.geometry)
            .unwrap_or_else(|| self.positioner.calculate_geometry())
    }
}

/// Popup errors that are the client's fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopupError {
    #[error("grab serial {serial} does not match the last button press")]
    InvalidGrabSerial { serial: u32 },
    #[error("popup already mapped, cannot grab")]
    GrabAfterMap,
    #[error("grabbing popup must be on top of the grab stack")]
    NotTopmost,
}

/// Manager for all popups
#[derive(Debug, Default)]
pub struct PopupManager {
    popups: HashMap<SurfaceId, Popup>,
    /// Grabbing popups, bottom to top
    grab_stack: Vec<SurfaceId>,
}

impl PopupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a popup
    pub fn create_popup(
        &mut self,
        surface_id: SurfaceId,
        parent: SurfaceId,
        positioner: XdgPositioner,
    ) -> &mut Popup {
        debug!("Created popup {:?} with parent {:?}", surface_id, parent);
        self.popups
            .entry(surface_id)
            .or_insert_with(|| Popup::new(surface_id, parent, positioner))
    }

    pub fn get(&self, surface_id: SurfaceId) -> Option<&Popup> {
        self.popups.get(&surface_id)
    }

    pub fn get_mut(&mut self, surface_id: SurfaceId) -> Option<&mut Popup> {
        self.popups.get_mut(&surface_id)
    }

    pub fn contains(&self, surface_id: SurfaceId) -> bool {
        self.popups.contains_key(&surface_id)
    }

    /// Take an explicit grab.
    ///
    /// `last_press` is the seat's most recent pointer button press serial.
    pub fn grab(
        &mut self,
        surface_id: SurfaceId,
        serial: u32,
        last_press: Option<u32>,
    ) -> Result<(), PopupError> {
        if last_press != Some(serial) {
            return Err(PopupError::InvalidGrabSerial { serial });
        }
        let parent_is_top = {
            let Some(popup) = self.popups.get(&surface_id) else {
                return Ok(());
            };
            if popup.mapped {
                return Err(PopupError::GrabAfterMap);
            }
            match self.grab_stack.last() {
                Some(top) => *top == popup.parent,
                // The first grab must come from a popup of a toplevel
                None => !self.popups.contains_key(&popup.parent),
            }
        };
        if !parent_is_top {
            return Err(PopupError::NotTopmost);
        }

        if let Some(popup) = self.popups.get_mut(&surface_id) {
            popup.grabbed = true;
        }
        self.grab_stack.push(surface_id);
        debug!("Popup {:?} grabbed (serial {})", surface_id, serial);
        Ok(())
    }

    /// Topmost grabbing popup that is still shown
    pub fn topmost_grab(&self) -> Option<SurfaceId> {
        self.grab_stack.last().copied()
    }

    /// Whether any popup holds a grab
    pub fn has_grab(&self) -> bool {
        !self.grab_stack.is_empty()
    }

    /// Grabbing popups, bottom to top
    pub fn grab_stack(&self) -> &[SurfaceId] {
        &self.grab_stack
    }

    /// Dismiss a popup and all of its descendants.
    ///
    /// Returns the dismissed popups top-down, in the order `popup_done`
    /// must be delivered.
    pub fn dismiss(&mut self, surface_id: SurfaceId) -> Vec<SurfaceId> {
        let mut order = Vec::new();
        self.collect_descendants(surface_id, &mut order);
        order.push(surface_id);

        let mut dismissed = Vec::new();
        for id in order {
            if let Some(popup) = self.popups.get_mut(&id) {
                if !popup.dismissed {
                    popup.dismissed = true;
                    popup.grabbed = false;
                    dismissed.push(id);
                }
            }
            self.grab_stack.retain(|s| *s != id);
        }
        if !dismissed.is_empty() {
            debug!("Dismissed popups {:?}", dismissed);
        }
        dismissed
    }

    /// Dismiss the whole grab chain, topmost first
    pub fn dismiss_grabs(&mut self) -> Vec<SurfaceId> {
        match self.grab_stack.first().copied() {
            Some(bottom) => self.dismiss(bottom),
            None => Vec::new(),
        }
    }

    /// Children first, deepest first
    fn collect_descendants(&self, parent: SurfaceId, out: &mut Vec<SurfaceId>) {
        let mut children: Vec<SurfaceId> = self
            .popups
            .values()
            .filter(|p| p.parent == parent)
            .map(|p| p.surface_id)
            .collect();
        children.sort();
        for child in children.into_iter().rev() {
            self.collect_descendants(child, out);
            out.push(child);
        }
    }

    /// Popups whose ancestor chain ends at `surface_id`, deepest first
    pub fn descendants(&self, surface_id: SurfaceId) -> Vec<SurfaceId> {
        let mut out = Vec::new();
        self.collect_descendants(surface_id, &mut out);
        out
    }

    /// The toplevel at the root of a popup chain
    pub fn root_of(&self, surface_id: SurfaceId) -> SurfaceId {
        let mut current = surface_id;
        while let Some(popup) = self.popups.get(&current) {
            current = popup.parent;
        }
        current
    }

    /// Remove a popup
    pub fn remove(&mut self, surface_id: SurfaceId) -> Option<Popup> {
        self.grab_stack.retain(|s| *s != surface_id);
        self.popups.remove(&surface_id)
    }

    /// Visible popups ordered parents before children
    pub fn visible_in_order(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self
            .popups
            .values()
            .filter(|p| p.mapped && !p.dismissed)
            .map(|p| p.surface_id)
            .collect();
        ids.sort_by_key(|id| (self.depth(*id), *id));
        ids
    }

    fn depth(&self, surface_id: SurfaceId) -> usize {
        let mut depth = 0;
        let mut current = surface_id;
        while let Some(popup) = self.popups.get(&current) {
            depth += 1;
            current = popup.parent;
        }
        depth
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SurfaceId, &Popup)> {
        self.popups.iter()
    }

    pub fn len(&self) -> usize {
        self.popups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.popups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positioner() -> XdgPositioner {
        let mut positioner = XdgPositioner::new();
        positioner.set_size(100, 100);
        positioner.set_anchor_rect(Rectangle::new(0, 0, 10, 10));
        positioner
    }

    #[test]
    fn test_grab_requires_last_press_serial() {
        let mut popups = PopupManager::new();
        let toplevel = SurfaceId(1);
        popups.create_popup(SurfaceId(2), toplevel, positioner());

        assert_eq!(
            popups.grab(SurfaceId(2), 4, Some(5)),
            Err(PopupError::InvalidGrabSerial { serial: 4 })
        );
        assert_eq!(
            popups.grab(SurfaceId(2), 4, None),
            Err(PopupError::InvalidGrabSerial { serial: 4 })
        );
        assert!(popups.grab(SurfaceId(2), 5, Some(5)).is_ok());
        assert_eq!(popups.topmost_grab(), Some(SurfaceId(2)));
    }

    #[test]
    fn test_grab_after_map_fails() {
        let mut popups = PopupManager::new();
        popups.create_popup(SurfaceId(2), SurfaceId(1), positioner()).mapped = true;
        assert_eq!(popups.grab(SurfaceId(2), 1, Some(1)), Err(PopupError::GrabAfterMap));
    }

    #[test]
    fn test_nested_dismiss_is_top_down() {
        let mut popups = PopupManager::new();
        let toplevel = SurfaceId(1);
        popups.create_popup(SurfaceId(2), toplevel, positioner());
        popups.create_popup(SurfaceId(3), SurfaceId(2), positioner());
        popups.create_popup(SurfaceId(4), SurfaceId(3), positioner());
        popups.grab(SurfaceId(2), 7, Some(7)).unwrap();
        popups.grab(SurfaceId(3), 7, Some(7)).unwrap();

        let dismissed = popups.dismiss_grabs();
        assert_eq!(dismissed, vec![SurfaceId(4), SurfaceId(3), SurfaceId(2)]);
        assert!(!popups.has_grab());

        // Already dismissed popups are not reported twice
        assert!(popups.dismiss(SurfaceId(2)).is_empty());
    }

    #[test]
    fn test_root_of_chain() {
        let mut popups = PopupManager::new();
        popups.create_popup(SurfaceId(2), SurfaceId(1), positioner());
        popups.create_popup(SurfaceId(3), SurfaceId(2), positioner());
        assert_eq!(popups.root_of(SurfaceId(3)), SurfaceId(1));
    }

    #[test]
    fn test_visible_order_parents_first() {
        let mut popups = PopupManager::new();
        popups.create_popup(SurfaceId(3), SurfaceId(2), positioner()).mapped = true;
        popups.create_popup(SurfaceId(2), SurfaceId(1), positioner()).mapped = true;
        assert_eq!(popups.visible_in_order(), vec![SurfaceId(2), SurfaceId(3)]);
    }
}
