mod route_table;

pub use route_table::{LiveRouteTable, ResolvedRoute, RouteTarget};
