pub mod shared {
    pub mod clock;
    pub mod constants;
    pub mod embedding;
}

pub mod identity {
    pub mod domain {
        pub mod cluster_engine;
        pub mod embedding_store;
        pub mod identity;
        pub mod identity_assigner;
        pub mod observation;
    }
    pub mod infrastructure;
}

pub mod capture {
    pub mod domain {
        pub mod capture_sink;
        pub mod cooldown_gate;
        pub mod visit_ledger;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod embedding_source;
    pub mod infrastructure;
    pub mod ingest_use_case;
    pub mod recognition_session;
    pub mod session_config;
    pub mod session_logger;
    pub mod visit_report_use_case;
}
