// End-to-end tests: real temp workspaces, real indexing, real queries.

mod helpers;

mod indexing;
mod search;
