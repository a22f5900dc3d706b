use std::rc::Rc;

use provision_engine::ActionRegistry;

mod actions;
mod fs_utils;
mod touchpoint;

pub use actions::{
    ChmodAction, CopyAction, LinkAction, MkdirAction, RemoveAction, RmdirAction, WriteAction,
};
pub use touchpoint::NativeTouchpoint;

pub const NATIVE_TOUCHPOINT: &str = "native";

/// Context or profile property naming the directory relative paths resolve
/// against.
pub const INSTALL_ROOT: &str = "install_root";

/// Adds the native touchpoint and its `native.*` actions to `registry`.
pub fn register(registry: &mut ActionRegistry) {
    registry.register_touchpoint(Rc::new(NativeTouchpoint::new()));
    registry.register_action("native.mkdir", || Box::new(MkdirAction::default()));
    registry.register_action("native.rmdir", || Box::new(RmdirAction::default()));
    registry.register_action("native.copy", || Box::new(CopyAction::default()));
    registry.register_action("native.remove", || Box::new(RemoveAction::default()));
    registry.register_action("native.link", || Box::new(LinkAction::default()));
    registry.register_action("native.chmod", || Box::new(ChmodAction::default()));
    registry.register_action("native.write", || Box::new(WriteAction::default()));
}

#[cfg(test)]
mod tests;
