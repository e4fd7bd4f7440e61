/// State management module
///
/// This module holds the interactive browsing state: the open folder, the
/// current selection, the tone-map parameters, and the caches that keep
/// navigation fast (session.rs).
pub mod session;
