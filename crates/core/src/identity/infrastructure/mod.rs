pub mod dbscan_cluster_engine;
pub mod math;
