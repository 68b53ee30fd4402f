//! Integration test modules.

mod challenge_flow_test;
mod geo_query_test;
mod search_test;
mod support;
mod upload_flow_test;
