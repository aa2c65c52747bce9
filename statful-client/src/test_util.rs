use mockall::mock;

use crate::{
    model::{Aggregation, AggregationFreq},
    transport::{Transport, TransportError},
};

mock! {
    pub Transport {}

    impl Transport for Transport {
        fn name(&self) -> &'static str;
        fn send(&self, batch: &str) -> Result<(), TransportError>;
        fn send_aggregated(
            &self,
            batch: &str,
            aggregation: Aggregation,
            frequency: AggregationFreq,
        ) -> Result<(), TransportError>;
        fn shutdown(&self);
    }
}

impl MockTransport {
    /// Creates a mock that tolerates any number of `name` and `shutdown` calls.
    pub fn lenient() -> Self {
        let mut transport = Self::new();
        transport.expect_name().return_const("mock");
        transport.expect_shutdown().return_const(());
        transport
    }
}
