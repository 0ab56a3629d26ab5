// vl-test-utils: a scriptable mock vibration gateway for integration tests.
//
// Binds port 0 (random) and exposes the bound address. Each test spins up an
// isolated gateway instance, points an agent session at it, and asserts on
// the frames the gateway recorded.

mod mock_gateway;

pub use mock_gateway::{MockGateway, MockGatewayOptions, ScriptedReading};
