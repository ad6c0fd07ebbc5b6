//! Integration tests for envtag

mod end_to_end;
mod rename_preservation;
mod static_route;
mod support;
mod ws_transport;
