// ABOUTME: Property tests for the relay request record and hop shorthand parsing.
// ABOUTME: Checks decode(encode(x)) == x and that arbitrary input never panics.

use hoptunnel::config::HopConfig;
use hoptunnel::tunnel::RelayRequest;
use proptest::prelude::*;

fn request() -> impl Strategy<Value = RelayRequest> {
    ("\\PC{0,64}", any::<u16>(), "\\PC{0,40}", any::<u16>()).prop_map(
        |(host, port, originator_address, originator_port)| RelayRequest {
            host,
            port,
            originator_address,
            originator_port,
        },
    )
}

proptest! {
    #[test]
    fn encoded_request_decodes_to_itself(req in request()) {
        let encoded = req.encode();
        prop_assert_eq!(RelayRequest::decode(&encoded), Ok(req));
    }

    #[test]
    fn encoded_length_matches_fields(req in request()) {
        let encoded = req.encode();
        let expected = 4 + req.host.len() + 4 + 4 + req.originator_address.len() + 4;
        prop_assert_eq!(encoded.len(), expected);
    }

    #[test]
    fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = RelayRequest::decode(&data);
    }

    #[test]
    fn truncated_encoding_is_rejected(req in request(), cut in 1usize..8) {
        let encoded = req.encode();
        let cut = cut.min(encoded.len());
        prop_assert!(RelayRequest::decode(&encoded[..encoded.len() - cut]).is_err());
    }

    #[test]
    fn hop_shorthand_round_trips(
        user in "[a-z][a-z0-9_]{0,15}",
        host in "[a-z][a-z0-9.-]{0,30}",
        port in 1u16..,
    ) {
        let parsed = HopConfig::parse(&format!("{user}@{host}:{port}")).unwrap();
        prop_assert_eq!(parsed.user.as_deref(), Some(user.as_str()));
        prop_assert_eq!(parsed.host, host);
        prop_assert_eq!(parsed.port, port);
    }
}
