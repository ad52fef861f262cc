//! fleetgrid-api — REST API for fleetgrid.
//!
//! Reads come from the cluster cache, so they show exactly what the
//! disruption logic sees. Writes go to the record store first and are
//! then published on the change feed, the same path any other producer
//! uses.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/machines` | List machines |
//! | POST | `/api/v1/machines` | Create or update a machine |
//! | DELETE | `/api/v1/machines/{name}` | Delete a machine |
//! | GET | `/api/v1/machines/{name}/workloads` | Workloads bound to a machine |
//! | GET | `/api/v1/workloads` | List workloads |
//! | POST | `/api/v1/workloads` | Create or update a workload |
//! | DELETE | `/api/v1/workloads/{namespace}/{name}` | Delete a workload |
//! | GET | `/api/v1/nodepools` | List node pools |
//! | POST | `/api/v1/nodepools` | Create or update a node pool |
//! | DELETE | `/api/v1/nodepools/{name}` | Delete a node pool |
//! | GET | `/api/v1/nodepools/{name}/budget` | Disruptions currently allowed |
//! | GET | `/api/v1/nodeclaims` | List node claims |
//! | POST | `/api/v1/nodeclaims` | Create a node claim |
//! | GET | `/api/v1/nodeclaims/{name}` | Get a node claim |
//! | PUT | `/api/v1/nodeclaims/{name}` | Update a node claim's requirements |
//! | DELETE | `/api/v1/nodeclaims/{name}` | Delete a terminated node claim |
//! | POST | `/api/v1/nodeclaims/{name}/lifecycle` | Report lifecycle progress |
//! | GET | `/api/v1/nominations` | Active nominations |
//! | POST | `/api/v1/nominations` | Nominate a machine |
//! | GET | `/api/v1/diagnostics` | Claims failing evaluation |
//! | GET | `/api/v1/snapshot` | Cache summary |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use fleetgrid_cluster::ClusterState;
use fleetgrid_controller::{Diagnostics, EventSender};
use fleetgrid_state::RecordStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: RecordStore,
    pub cluster: Arc<ClusterState>,
    pub events: EventSender,
    pub diagnostics: Arc<Diagnostics>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/machines", get(handlers::list_machines).post(handlers::put_machine))
        .route("/machines/{name}", delete(handlers::delete_machine))
        .route("/machines/{name}/workloads", get(handlers::machine_workloads))
        .route("/workloads", get(handlers::list_workloads).post(handlers::put_workload))
        .route("/workloads/{namespace}/{name}", delete(handlers::delete_workload))
        .route("/nodepools", get(handlers::list_node_pools).post(handlers::put_node_pool))
        .route("/nodepools/{name}", delete(handlers::delete_node_pool))
        .route("/nodepools/{name}/budget", get(handlers::node_pool_budget))
        .route("/nodeclaims", get(handlers::list_node_claims).post(handlers::create_node_claim))
        .route(
            "/nodeclaims/{name}",
            get(handlers::get_node_claim)
                .put(handlers::update_node_claim)
                .delete(handlers::delete_node_claim),
        )
        .route("/nodeclaims/{name}/lifecycle", post(handlers::transition_node_claim))
        .route("/nominations", get(handlers::list_nominations).post(handlers::nominate))
        .route("/diagnostics", get(handlers::diagnostics))
        .route("/snapshot", get(handlers::snapshot))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
