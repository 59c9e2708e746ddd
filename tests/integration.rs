//! End-to-end scenarios over real multicast sockets: a publisher and a
//! subscriber interface exchanging messages through the full topic-to-group
//! hash and wire codec.
//!
//! These bind real UDP sockets and join real multicast groups; sandboxed CI
//! environments without multicast routing will fail them, so the
//! timing-sensitive ones are `#[ignore]`d.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use umps::{Callback, Config, Interface};

const TEST_NETWORK: Ipv4Addr = Ipv4Addr::new(239, 11, 122, 0);

/// Surfaces the endpoints' `debug!`/`warn!` logging when these tests are run
/// with `RUST_LOG` set, which is the first thing worth checking on a
/// multicast-routing failure.
fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
#[ignore = "requires a host with multicast routing available"]
fn round_trip_single_frame() {
    init_logging();
    let publisher = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();
    let subscriber = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();

    let received: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let callback: Callback = Arc::new(move |topic: &str, body: &[u8]| {
        received_clone.lock().unwrap().push((topic.to_string(), body.to_vec()));
    });
    subscriber.subscribe("greeting", callback).unwrap();

    // Give the subscriber's IGMP join time to land before publishing.
    std::thread::sleep(Duration::from_millis(200));

    publisher.publish("greeting", b"hello, world!").unwrap();

    let delivered = wait_until(Duration::from_secs(3), || received.lock().unwrap().len() == 1);
    assert!(delivered, "expected exactly one callback within the timeout");
    let got = received.lock().unwrap();
    assert_eq!(got[0].0, "greeting");
    assert_eq!(got[0].1, b"hello, world!");

    publisher.terminate();
    subscriber.terminate();
}

#[test]
#[ignore = "requires a host with multicast routing available"]
fn multi_frame_message_reassembles_correctly() {
    init_logging();
    let publisher = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();
    let subscriber = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();

    let body = vec![0xABu8; 1500];
    let received: Arc<Mutex<Option<(String, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let received_clone = Arc::clone(&received);
    let callback: Callback = Arc::new(move |topic: &str, msg_body: &[u8]| {
        *received_clone.lock().unwrap() = Some((topic.to_string(), msg_body.to_vec()));
    });
    subscriber.subscribe("t", callback).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    publisher.publish("t", &body).unwrap();

    let delivered = wait_until(Duration::from_secs(3), || received.lock().unwrap().is_some());
    assert!(delivered);
    let got = received.lock().unwrap().clone().unwrap();
    assert_eq!(got.0, "t");
    assert_eq!(got.1, body);

    publisher.terminate();
    subscriber.terminate();
}

#[test]
#[ignore = "requires a host with multicast routing available"]
fn topic_isolation_via_hashing() {
    init_logging();
    let publisher = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();
    let subscriber = Interface::new(Config::new(TEST_NETWORK, 24).unwrap()).unwrap();

    assert_ne!(
        umps::hash::hash("alpha", 254),
        umps::hash::hash("beta", 254),
        "test fixture requires these two topics to hash to different bins"
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let callback: Callback = Arc::new(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });
    subscriber.subscribe("alpha", callback).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    publisher.publish("beta", b"should not arrive").unwrap();
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(calls.load(Ordering::SeqCst), 0);

    publisher.terminate();
    subscriber.terminate();
}

#[test]
fn unsubscribe_removes_callback_and_leaves_empty_groups() {
    let iface = Interface::new(Config::new(TEST_NETWORK, 24).unwrap().with_port(0)).unwrap();
    let callback: Callback = Arc::new(|_, _| {});
    iface.subscribe("greeting", callback).unwrap();
    iface.unsubscribe("greeting").unwrap();
    assert!(matches!(
        iface.unsubscribe("greeting"),
        Err(umps::Error::NotSubscribed)
    ));
    iface.terminate();
}

#[test]
fn publish_after_terminate_fails_not_connected() {
    let iface = Interface::new(Config::new(TEST_NETWORK, 24).unwrap().with_port(0)).unwrap();
    iface.terminate();
    let err = iface.publish("greeting", b"hi").unwrap_err();
    assert!(matches!(err, umps::Error::NotConnected));
}
