//! Filesystem locations.

pub mod xdg_root;
