pub mod paper_executor;
