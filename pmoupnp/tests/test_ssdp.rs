use crossbeam_channel::{Receiver, unbounded};
use pmoupnp::Scheduler;
use pmoupnp::net::{Datagram, DatagramTransport, LoopbackNetwork};
use pmoupnp::ssdp::protocol::{create_alive_notify, create_alive_response, create_discovery_request};
use pmoupnp::ssdp::{
    Announcement, DiscoveryEndpoints, SearchSettings, SsdpAnnouncer, SsdpClient, SsdpError,
    SsdpEvent, SsdpListener, SsdpMessage, SsdpSearch, SsdpServer, UPNP_ROOT_DEVICE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const UUID: &str = "uuid:2fac1234-31f8-11b4-a222-08002b34c003";
const LOCATION: &str = "http://127.0.0.1:8080/device.xml";

fn root_announcement() -> Announcement {
    Announcement::new(
        UPNP_ROOT_DEVICE,
        format!("{}::{}", UUID, UPNP_ROOT_DEVICE),
        LOCATION,
    )
}

fn collect(transport: &dyn DatagramTransport) -> Receiver<Datagram> {
    let (tx, rx) = unbounded();
    transport.add_handler(Arc::new(move |d: &Datagram| {
        let _ = tx.send(d.clone());
    }));
    rx
}

/// Serveur répondant pour `upnp:rootdevice` sur le port 1900 du réseau simulé.
fn responder(net: &LoopbackNetwork, scheduler: &Arc<Scheduler>) -> SsdpServer {
    let server = SsdpServer::new(scheduler.clone(), Arc::new(net.transport(1900)));
    server.create_announcer(root_announcement(), true);
    server.start_listening().unwrap();
    server
}

#[test]
fn test_announcer_sends_one_alive_then_one_byebye_per_destination() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let transport = Arc::new(net.transport(1900));

    let announcement = Announcement {
        max_age: 3,
        destinations: vec![DiscoveryEndpoints::IPV4, DiscoveryEndpoints::BROADCAST],
        ..root_announcement()
    };
    let announcer = SsdpAnnouncer::new(scheduler.clone(), transport.clone(), announcement);

    announcer.start();
    announcer.start();
    assert!(announcer.is_running());
    assert!(transport.broadcast(), "broadcast destination enables SO_BROADCAST");

    thread::sleep(Duration::from_millis(950));
    announcer.shutdown();
    announcer.shutdown();
    assert!(!announcer.is_running());

    for dest in [DiscoveryEndpoints::IPV4, DiscoveryEndpoints::BROADCAST] {
        let sent: Vec<String> = net.sent_to(dest).iter().map(|d| d.text()).collect();
        let alive = sent.iter().filter(|m| m.contains("NTS: ssdp:alive")).count();
        let byebye = sent.iter().filter(|m| m.contains("NTS: ssdp:byebye")).count();
        assert_eq!(alive, 1, "alive messages to {}: {:?}", dest, sent);
        assert_eq!(byebye, 1, "byebye messages to {}: {:?}", dest, sent);
    }

    // Plus rien après l'arrêt
    let count = net.sent().len();
    thread::sleep(Duration::from_millis(1600));
    assert_eq!(net.sent().len(), count);
}

#[test]
fn test_responder_schedules_only_matching_replies() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let server = responder(&net, &scheduler);
    let source: SocketAddr = "127.0.9.9:50000".parse().unwrap();

    let all = create_discovery_request(DiscoveryEndpoints::IPV4, "ssdp:all", 1);
    let msg = SsdpMessage::parse(all.as_bytes(), source).unwrap();
    assert_eq!(server.respond_to_search(&msg), 1);

    let unrelated = create_discovery_request(DiscoveryEndpoints::IPV4, "urn:unrelated:service:1", 1);
    let msg = SsdpMessage::parse(unrelated.as_bytes(), source).unwrap();
    assert_eq!(server.respond_to_search(&msg), 0);
}

#[test]
fn test_responder_ignores_disabled_announcers() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let server = SsdpServer::new(scheduler.clone(), Arc::new(net.transport(1900)));
    let announcer = server.create_announcer(root_announcement(), false);

    let source: SocketAddr = "127.0.9.9:50000".parse().unwrap();
    let request = create_discovery_request(DiscoveryEndpoints::IPV4, UPNP_ROOT_DEVICE, 1);
    let msg = SsdpMessage::parse(request.as_bytes(), source).unwrap();
    assert_eq!(server.respond_to_search(&msg), 0);

    assert!(server.set_respond_to_searches(announcer.id(), true));
    assert_eq!(server.respond_to_search(&msg), 1);
    assert_eq!(server.matching_announcers(&msg).len(), 1);
}

#[test]
fn test_responder_replies_to_multicast_search() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let client = net.transport(0);
    let replies = collect(&client);
    client.start_listening().unwrap();

    let request = create_discovery_request(DiscoveryEndpoints::IPV4, "ssdp:all", 1);
    client
        .send(request.as_bytes(), DiscoveryEndpoints::IPV4)
        .unwrap();

    let reply = replies
        .recv_timeout(Duration::from_secs(3))
        .expect("a search response within MX");
    let msg = SsdpMessage::parse(&reply.data, reply.source).unwrap();
    assert!(msg.is_response());
    assert_eq!(msg.search_type(), "ssdp:all");
    assert_eq!(msg.usn(), format!("{}::{}", UUID, UPNP_ROOT_DEVICE));
    assert_eq!(msg.location(), LOCATION);
    assert!(msg.ext());
}

#[test]
fn test_no_reply_after_stop_listening() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let server = responder(&net, &scheduler);

    let client = net.transport(0);
    let replies = collect(&client);
    client.start_listening().unwrap();

    let request = create_discovery_request(DiscoveryEndpoints::IPV4, "ssdp:all", 2);
    let msg = SsdpMessage::parse(request.as_bytes(), client.addr()).unwrap();
    assert_eq!(server.respond_to_search(&msg), 1);
    server.stop_listening();

    assert!(replies.recv_timeout(Duration::from_millis(2500)).is_err());
}

#[test]
fn test_find_first_returns_first_response() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport(0)));
    search.set_settings(SearchSettings::new(UPNP_ROOT_DEVICE).with_mx(1));

    let found = search
        .find_first(&[])
        .unwrap()
        .expect("the responder should answer");
    assert_eq!(found.search_type(), UPNP_ROOT_DEVICE);
    assert_eq!(found.udn(), UUID);
    assert!(!search.is_searching());

    // Deux requêtes par destination
    let requests = net
        .sent_to(DiscoveryEndpoints::IPV4)
        .iter()
        .filter(|d| d.text().starts_with("M-SEARCH"))
        .count();
    assert_eq!(requests, 2);
}

#[test]
fn test_search_collects_until_timeout() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport(0)));
    search.set_settings(SearchSettings::new("ssdp:all").with_mx(1));

    let results = search.search(&[DiscoveryEndpoints::IPV4]).unwrap();
    // Une réponse par requête envoyée
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|m| m.location() == LOCATION));
}

#[test]
fn test_search_filter_drops_results() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport(0)));
    search.set_settings(SearchSettings::new("ssdp:all").with_mx(1));
    search.set_filter(Some(Arc::new(|m: &SsdpMessage| m.location() != LOCATION)));

    assert!(search.find_first(&[]).unwrap().is_none());
}

#[test]
fn test_cancel_twice_completes_once() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport(0)));

    let completed = Arc::new(AtomicUsize::new(0));
    let c = completed.clone();
    search.on_search_complete(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    search.search_async(&[]).unwrap();
    assert!(search.is_searching());
    assert!(matches!(
        search.search_async(&[]),
        Err(SsdpError::SearchInProgress)
    ));

    search.cancel_search();
    search.cancel_search();
    search.wait_for_search();

    assert!(!search.is_searching());
    assert_eq!(completed.load(Ordering::SeqCst), 1);

    // La session est réutilisable
    search.search_async(&[]).unwrap();
    search.cancel_search();
    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_search_times_out_after_twice_mx() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport(0)));
    search.set_mx(1);

    let started = std::time::Instant::now();
    let results = search.search(&[]).unwrap();
    let elapsed = started.elapsed();

    assert!(results.is_empty());
    assert!(elapsed >= Duration::from_millis(1900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "{:?}", elapsed);
}

#[test]
fn test_client_deduplicates_by_usn() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let client = SsdpClient::with_transport(scheduler.clone(), Arc::new(net.transport(0)));
    let events = client.subscribe();

    let search = client.create_search(false);
    search.set_settings(SearchSettings::new(UPNP_ROOT_DEVICE).with_mx(1));
    let results = search.search(&[]).unwrap();

    assert_eq!(results.len(), 1);
    let event = events.try_recv().expect("search response published");
    assert!(matches!(event, SsdpEvent::SearchResponse(ref m) if m.location() == LOCATION));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_client_deduplicates_by_location() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let server = responder(&net, &scheduler);
    // Deuxième USN, même description
    server.create_announcer(
        Announcement::new(UUID, UUID, LOCATION),
        true,
    );

    let client = SsdpClient::with_transport(scheduler.clone(), Arc::new(net.transport(0)));
    let search = client.create_search(true);
    search.set_settings(SearchSettings::new("ssdp:all").with_mx(1));

    let results = search.search(&[]).unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn test_listener_publishes_alive_and_byebye() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());

    let listener = SsdpListener::new(Arc::new(net.transport(1900)));
    let events = listener.subscribe();
    listener.start_listening(&[]).unwrap();
    assert!(listener.is_listening());

    let announcement = Announcement {
        destinations: vec![DiscoveryEndpoints::IPV4],
        ..root_announcement()
    };
    let announcer = SsdpAnnouncer::new(scheduler.clone(), Arc::new(net.transport(1900)), announcement);
    announcer.start();

    let alive = events
        .recv_timeout(Duration::from_secs(2))
        .expect("alive event");
    assert!(matches!(alive, SsdpEvent::Alive(ref m) if m.udn() == UUID));

    announcer.shutdown();
    let byebye = events
        .recv_timeout(Duration::from_secs(2))
        .expect("byebye event");
    assert!(matches!(byebye, SsdpEvent::ByeBye(ref m) if m.notification_type() == UPNP_ROOT_DEVICE));

    listener.stop_listening();
    assert!(!listener.is_listening());
}

#[test]
fn test_server_device_lifecycle() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let server = SsdpServer::new(scheduler.clone(), Arc::new(net.transport(1900)));

    let mut device = pmoupnp::ssdp::SsdpDevice::new(
        "2fac1234-31f8-11b4-a222-08002b34c003",
        "urn:schemas-upnp-org:device:MediaRenderer:1",
        LOCATION,
    );
    device.add_service("urn:schemas-upnp-org:service:AVTransport:1");
    server.add_device(device);

    assert_eq!(server.announcers().len(), 4);
    assert!(server.announcers().iter().all(|a| a.is_running()));

    assert!(server.remove_device("2fac1234-31f8-11b4-a222-08002b34c003"));
    assert!(server.announcers().is_empty());
    let byebyes = net
        .sent()
        .iter()
        .filter(|d| d.text().contains("ssdp:byebye"))
        .count();
    // 4 NT × (multicast + broadcast)
    assert_eq!(byebyes, 8);
}

const MALFORMED: [&[u8]; 4] = [
    b"garbage",
    b"",
    b"M-SEARCH\r\n\r\n",
    b"HTTP/1.1 abc OK\r\nST: ssdp:all\r\n\r\n",
];

#[test]
fn test_responder_survives_malformed_datagrams() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let _server = responder(&net, &scheduler);

    let client = net.transport(0);
    let replies = collect(&client);
    client.start_listening().unwrap();

    for data in MALFORMED {
        net.inject(data, client.addr(), DiscoveryEndpoints::IPV4);
    }
    let request = create_discovery_request(DiscoveryEndpoints::IPV4, UPNP_ROOT_DEVICE, 1);
    net.inject(request.as_bytes(), client.addr(), DiscoveryEndpoints::IPV4);

    let reply = replies
        .recv_timeout(Duration::from_secs(3))
        .expect("the receive loop keeps answering after garbage");
    let msg = SsdpMessage::parse(&reply.data, reply.source).unwrap();
    assert_eq!(msg.search_type(), UPNP_ROOT_DEVICE);
}

#[test]
fn test_listener_survives_malformed_datagrams() {
    let net = LoopbackNetwork::new();
    let listener = SsdpListener::new(Arc::new(net.transport(1900)));
    let events = listener.subscribe();
    listener.start_listening(&[]).unwrap();

    let source: SocketAddr = "127.0.9.9:1900".parse().unwrap();
    for data in MALFORMED {
        net.inject(data, source, DiscoveryEndpoints::IPV4);
    }
    let alive = create_alive_notify(
        DiscoveryEndpoints::IPV4,
        LOCATION,
        UPNP_ROOT_DEVICE,
        &format!("{}::{}", UUID, UPNP_ROOT_DEVICE),
        1800,
        "test/1.0",
    );
    net.inject(alive.as_bytes(), source, DiscoveryEndpoints::IPV4);

    let event = events
        .recv_timeout(Duration::from_secs(2))
        .expect("alive event after garbage");
    assert!(matches!(event, SsdpEvent::Alive(ref m) if m.udn() == UUID));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_search_survives_malformed_datagrams() {
    let net = LoopbackNetwork::new();
    let scheduler = Arc::new(Scheduler::new());
    let addr: SocketAddr = "127.0.8.8:50123".parse().unwrap();

    let search = SsdpSearch::with_owned_transport(scheduler.clone(), Arc::new(net.transport_at(addr)));
    search.set_settings(SearchSettings::new(UPNP_ROOT_DEVICE).with_mx(1));

    let injector = {
        let net = net.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            let device: SocketAddr = "127.0.9.9:1900".parse().unwrap();
            for data in MALFORMED {
                net.inject(data, device, addr);
            }
            let response = create_alive_response(
                LOCATION,
                UPNP_ROOT_DEVICE,
                &format!("{}::{}", UUID, UPNP_ROOT_DEVICE),
                1800,
                "test/1.0",
            );
            net.inject(response.as_bytes(), device, addr);
        })
    };

    let results = search.search(&[DiscoveryEndpoints::IPV4]).unwrap();
    injector.join().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].udn(), UUID);
}
