//! GraphQL operations, responses, and the client session.
//!
//! # Example
//!
//! ```ignore
//! use smartmatch_net::graphql::{GraphQLClient, GraphQLRequest};
//!
//! let client = GraphQLClient::builder().build()?;
//!
//! // Watch the first page of a filtered product list
//! let products = client.watch_query(
//!     GraphQLRequest::query(r#"
//!         query Products($filter: ProductFilter, $after: String) {
//!             products(filter: $filter, after: $after) {
//!                 edges { cursor node { id name } }
//!                 pageInfo { endCursor hasNextPage }
//!             }
//!         }
//!     "#)
//!     .variable("filter", serde_json::json!({"category": "lamps"})),
//! );
//! let _guard = products.observe(|result| println!("{:?}", result.data));
//! products.refetch().await?;
//!
//! // Append the next page to the same cache entry
//! products.fetch_more(serde_json::json!({"after": "cursor-20"})).await?;
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! let mut bids = client
//!     .subscribe(&GraphQLRequest::subscription(
//!         "subscription OnBid { bidPlaced { amount } }",
//!     ))
//!     .await?;
//!
//! while let Some(message) = bids.next().await {
//!     match message {
//!         SubscriptionMessage::Data(response) => println!("{:?}", response.data),
//!         SubscriptionMessage::Complete => break,
//!         SubscriptionMessage::Error(e) => eprintln!("{e}"),
//!     }
//! }
//! ```

mod client;
mod document;
mod request;
mod response;
mod watch;

pub use client::{GraphQLClient, GraphQLClientBuilder};
pub use document::{ArgumentValue, OperationSummary, RootField, summarize};
pub use request::{GraphQLRequest, OperationType};
pub use response::{DEFAULT_ERROR_CODE, GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
pub use watch::{FetchPolicy, ObservableQuery, QueryResult, ResultSource};
