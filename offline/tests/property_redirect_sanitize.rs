//! Property 4: Redirect sanitization
//!
//! For any response, the sanitized copy has the redirected flag cleared and
//! the same status, status text, headers and body.

use proptest::prelude::*;

use kpio_offline::interceptor::sanitize_redirect;
use kpio_offline::Response;

fn arb_response() -> impl Strategy<Value = Response> {
    (
        prop_oneof![Just(200u16), Just(203), Just(301), Just(404), 100u16..600],
        "[a-zA-Z ]{0,16}",
        proptest::collection::vec(("[A-Za-z\\-]{1,12}", "[ -~]{0,20}"), 0..6),
        proptest::collection::vec(any::<u8>(), 0..64),
        any::<bool>(),
    )
        .prop_map(|(status, text, headers, body, redirected)| {
            let mut response = Response::new(status).with_body(body).with_redirected(redirected);
            response.status_text = text;
            for (name, value) in headers {
                response = response.with_header(name, value);
            }
            response
        })
}

proptest! {
    #[test]
    fn sanitized_keeps_everything_but_the_flag(response in arb_response()) {
        let clean = sanitize_redirect(response.clone());

        prop_assert!(!clean.redirected);
        prop_assert_eq!(clean.status, response.status);
        prop_assert_eq!(&clean.status_text, &response.status_text);
        prop_assert_eq!(&clean.headers, &response.headers);
        prop_assert_eq!(&clean.body, &response.body);
        prop_assert_eq!(&clean.url, &response.url);
    }
}
