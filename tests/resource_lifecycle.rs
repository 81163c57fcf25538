//! End-to-end resource lifecycle tests against a mocked Huawei Cloud
//!
//! Every service endpoint is pointed at one wiremock server; the project
//! ID is configured so no IAM lookup happens.

use hwcloud_provider::cloud::client::CloudClient;
use hwcloud_provider::config::Config;
use hwcloud_provider::resource::{get_kind, Lifecycle, ResourceData};
use serde_json::json;
use std::collections::HashMap;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> Config {
    let endpoints: HashMap<String, String> = ["er", "sms", "vpc"]
        .iter()
        .map(|svc| (svc.to_string(), server.uri()))
        .collect();

    Config {
        region: Some("cn-north-4".to_string()),
        project_id: Some("p1".to_string()),
        token: Some("test-token".to_string()),
        endpoints,
        ..Config::default()
    }
}

fn lifecycle(server: &MockServer) -> Lifecycle {
    Lifecycle::new(CloudClient::new(&config(server)).unwrap())
}

fn instance_body(state: &str) -> serde_json::Value {
    json!({
        "instance": {
            "id": "er-1",
            "name": "core-router",
            "state": state,
            "asn": 64512,
            "availability_zone_ids": ["cn-north-4a", "cn-north-4b"],
            "enable_default_propagation": true,
            "enable_default_association": true,
            "created_at": "2024-01-01T00:00:00Z"
        }
    })
}

fn task_body() -> serde_json::Value {
    json!({
        "id": "task-1",
        "state": "READY",
        "type": "MIGRATE_FILE",
        "os_type": "LINUX",
        "region_id": "cn-north-4",
        "project_id": "p1",
        "source_server": {"id": "src-1"},
        "target_server": {
            "vm_id": "vm-1",
            "name": "target",
            "disks": [{"name": "/dev/vda", "device_use": "BOOT", "size": 42949672960_i64, "used_size": 1073741824}]
        }
    })
}

async fn mount_task_reads(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v3/tasks/task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/tasks/task-1/speed-limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "speed_limit": [{"start": "00:00", "end": "23:59", "speed": 100}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/tasks/task-1/configuration-setting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "migrate_type": "FILE",
            "configurations": []
        })))
        .mount(server)
        .await;
    // Passphrase is optional; a failed extra read is only logged
    Mock::given(method("GET"))
        .and(path("/v3/tasks/task-1/passphrase"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

mod er_instance {
    use super::*;

    #[tokio::test]
    async fn test_read_flattens_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .and(header("X-Auth-Token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body("available")))
            .mount(&server)
            .await;

        let kind = get_kind("er_instance").unwrap();
        let data = ResourceData::new("er_instance")
            .with_id("er-1")
            .with_attr("description", json!("stale"));

        let read = assert_ok!(lifecycle(&server).read(kind.as_ref(), data).await).unwrap();

        assert_eq!(read.get_str("name"), Some("core-router"));
        assert_eq!(read.get_str("status"), Some("available"));
        assert_eq!(read.get("asn"), Some(&json!(64512)));
        assert_eq!(
            read.get("availability_zones"),
            Some(&json!(["cn-north-4a", "cn-north-4b"]))
        );
        assert!(read.get("description").is_none(), "absent attributes are dropped");
    }

    #[tokio::test]
    async fn test_read_missing_instance_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let kind = get_kind("er_instance").unwrap();
        let data = ResourceData::new("er_instance").with_id("er-1");

        let read = assert_ok!(lifecycle(&server).read(kind.as_ref(), data).await);
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_instance_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let kind = get_kind("er_instance").unwrap();
        let data = ResourceData::new("er_instance").with_id("er-1");

        assert_ok!(lifecycle(&server).delete(kind.as_ref(), &data).await);
    }

    /// Sleeps through the instance's 10s delete delay and one 5s interval
    #[tokio::test]
    async fn test_delete_waits_until_instance_is_gone() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(instance_body("deleting")))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/p1/enterprise-router/instances/er-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let kind = get_kind("er_instance").unwrap();
        let data = ResourceData::new("er_instance").with_id("er-1");

        assert_ok!(lifecycle(&server).delete(kind.as_ref(), &data).await);
    }

    #[tokio::test]
    async fn test_rejected_create_is_not_polled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/p1/enterprise-router/instances"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_code": "ER.0001",
                "error_msg": "invalid asn"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let kind = get_kind("er_instance").unwrap();
        let data = ResourceData::new("er_instance")
            .with_attr("name", json!("core-router"))
            .with_attr("asn", json!(1));

        let err = assert_err!(lifecycle(&server).create(kind.as_ref(), data).await);
        let msg = format!("{:#}", err);
        assert!(msg.contains("error creating er_instance"), "{}", msg);
        assert!(msg.contains("invalid asn"), "{}", msg);
    }
}

/// Association waits sleep through the link's real 5s initial delay
mod er_association {
    use super::*;

    const ROUTE_TABLE_PATH: &str = "/v3/p1/enterprise-router/er-1/route-tables/rt-1";

    fn record() -> ResourceData {
        ResourceData::new("er_association")
            .with_attr("instance_id", json!("er-1"))
            .with_attr("route_table_id", json!("rt-1"))
            .with_attr("attachment_id", json!("att-1"))
    }

    #[tokio::test]
    async fn test_create_waits_on_paginated_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/associate", ROUTE_TABLE_PATH)))
            .and(body_json(json!({"attachment_id": "att-1"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "association": {"id": "as-1", "state": "pending"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/associations", ROUTE_TABLE_PATH)))
            .and(query_param("attachment_id", "att-1"))
            .and(query_param("marker", "as-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "associations": [{
                    "id": "as-1",
                    "state": "available",
                    "resource_type": "vpc",
                    "resource_id": "vpc-1"
                }],
                "page_info": {}
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/associations", ROUTE_TABLE_PATH)))
            .and(query_param("attachment_id", "att-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "associations": [{"id": "as-0", "state": "available"}],
                "page_info": {"next_marker": "as-0"}
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let kind = get_kind("er_association").unwrap();
        let created = assert_ok!(lifecycle(&server).create(kind.as_ref(), record()).await);

        assert_eq!(created.id.as_deref(), Some("as-1"));
        assert_eq!(created.get_str("status"), Some("available"));
        assert_eq!(created.get_str("resource_id"), Some("vpc-1"));
        assert_eq!(created.get_str("attachment_type"), Some("vpc"));
    }

    #[tokio::test]
    async fn test_delete_completes_when_link_leaves_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/disassociate", ROUTE_TABLE_PATH)))
            .and(body_json(json!({"attachment_id": "att-1"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/associations", ROUTE_TABLE_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "associations": [],
                "page_info": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let kind = get_kind("er_association").unwrap();
        let data = record().with_id("as-1");

        assert_ok!(lifecycle(&server).delete(kind.as_ref(), &data).await);
    }
}

mod sms_task {
    use super::*;

    #[tokio::test]
    async fn test_create_without_start_skips_waiting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "task-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/sources/src-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        mount_task_reads(&server).await;

        let kind = get_kind("sms_task").unwrap();
        let data = ResourceData::new("sms_task")
            .with_attr("type", json!("MIGRATE_FILE"))
            .with_attr("os_type", json!("LINUX"))
            .with_attr("source_server_id", json!("src-1"))
            .with_attr("target_server_id", json!("vm-1"))
            .with_attr(
                "target_server_disks",
                json!([{"name": "/dev/vda", "device_type": "BOOT", "size": 40960, "used_size": 1024}]),
            );

        let created = assert_ok!(lifecycle(&server).create(kind.as_ref(), data).await);

        assert_eq!(created.id.as_deref(), Some("task-1"));
        assert_eq!(created.get_str("state"), Some("READY"));
        assert_eq!(created.get_str("migrate_type"), Some("FILE"));
        assert_eq!(created.get("target_server_disks").unwrap()[0]["size"], json!(40960));
        assert!(created.get("passphrase").is_none());

        let requests = server.received_requests().await.unwrap();
        let create = requests
            .iter()
            .find(|r| r.method.as_str() == "POST" && r.url.path() == "/v3/tasks")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
        assert_eq!(body["target_server"]["disks"][0]["size"], json!(42949672960_i64));
        assert_eq!(body["exist_server"], json!(true));
        assert_eq!(body["project_name"], "cn-north-4");
        assert_eq!(body["source_server"]["id"], "src-1");
    }

    #[tokio::test]
    async fn test_update_speed_limit_posts_new_limits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/tasks/task-1/speed-limit"))
            .and(body_json(json!({
                "speed_limit": [{"start": "00:00", "end": "23:59", "speed": 100}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/tasks/task-1/configuration-setting"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        mount_task_reads(&server).await;

        let kind = get_kind("sms_task").unwrap();
        let current = ResourceData::new("sms_task")
            .with_id("task-1")
            .with_attr("type", json!("MIGRATE_FILE"))
            .with_attr("speed_limit", json!([]));
        let desired = ResourceData::new("sms_task")
            .with_attr("type", json!("MIGRATE_FILE"))
            .with_attr(
                "speed_limit",
                json!([{"start": "00:00", "end": "23:59", "speed": 100}]),
            );

        let updated = assert_ok!(
            lifecycle(&server)
                .update(kind.as_ref(), &current, desired)
                .await
        );

        assert_eq!(updated.get("speed_limit").unwrap()[0]["speed"], json!(100));
    }

    #[tokio::test]
    async fn test_delete_is_synchronous() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v3/tasks/task-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let kind = get_kind("sms_task").unwrap();
        let data = ResourceData::new("sms_task").with_id("task-1");

        assert_ok!(lifecycle(&server).delete(kind.as_ref(), &data).await);
    }
}

/// These tests sleep through the subnet's real initial delay
mod vpc_subnet {
    use super::*;

    async fn mount_create(server: &MockServer, status: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/p1/subnets"))
            .and(body_json(json!({
                "subnet": {
                    "name": "subnet-a",
                    "cidr": "192.168.0.0/24",
                    "gateway_ip": "192.168.0.1",
                    "vpc_id": "vpc-1",
                    "dhcp_enable": true
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subnet": {"id": "s-1", "status": "UNKNOWN"}
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/subnets/s-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subnet": {
                    "id": "s-1",
                    "name": "subnet-a",
                    "cidr": "192.168.0.0/24",
                    "gateway_ip": "192.168.0.1",
                    "vpc_id": "vpc-1",
                    "dhcp_enable": true,
                    "neutron_subnet_id": "n-1",
                    "status": status
                }
            })))
            .mount(server)
            .await;
    }

    fn desired() -> ResourceData {
        ResourceData::new("vpc_subnet")
            .with_attr("name", json!("subnet-a"))
            .with_attr("cidr", json!("192.168.0.0/24"))
            .with_attr("gateway_ip", json!("192.168.0.1"))
            .with_attr("vpc_id", json!("vpc-1"))
            .with_attr("dhcp_enable", json!(true))
            .with_attr("description", json!(""))
    }

    #[tokio::test]
    async fn test_create_waits_for_active() {
        let server = MockServer::start().await;
        mount_create(&server, "ACTIVE").await;

        let kind = get_kind("vpc_subnet").unwrap();
        let created = assert_ok!(lifecycle(&server).create(kind.as_ref(), desired()).await);

        assert_eq!(created.id.as_deref(), Some("s-1"));
        assert_eq!(created.get_str("status"), Some("ACTIVE"));
        assert_eq!(created.get_str("ipv4_subnet_id"), Some("n-1"));
    }

    #[tokio::test]
    async fn test_update_runs_call_then_waits() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/p1/vpcs/vpc-1/subnets/s-1"))
            .and(body_json(json!({
                "subnet": {"name": "subnet-b", "dhcp_enable": true}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subnet": {"id": "s-1", "status": "ACTIVE"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/p1/subnets/s-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subnet": {
                    "id": "s-1",
                    "name": "subnet-b",
                    "cidr": "192.168.0.0/24",
                    "vpc_id": "vpc-1",
                    "dhcp_enable": true,
                    "status": "ACTIVE"
                }
            })))
            .mount(&server)
            .await;

        let kind = get_kind("vpc_subnet").unwrap();
        let current = ResourceData::new("vpc_subnet")
            .with_id("s-1")
            .with_attr("name", json!("subnet-a"))
            .with_attr("cidr", json!("192.168.0.0/24"))
            .with_attr("vpc_id", json!("vpc-1"))
            .with_attr("dhcp_enable", json!(true))
            .with_attr("status", json!("ACTIVE"));
        let mut desired = current.clone();
        desired.id = None;
        desired.set("name", json!("subnet-b"));

        let updated = assert_ok!(
            lifecycle(&server)
                .update(kind.as_ref(), &current, desired)
                .await
        );
        assert_eq!(updated.get_str("name"), Some("subnet-b"));

        // The status wait and the refresh both come after the update call
        let requests = server.received_requests().await.unwrap();
        let methods: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["PUT", "GET", "GET"]);
    }

    #[tokio::test]
    async fn test_create_reports_failure_state() {
        let server = MockServer::start().await;
        mount_create(&server, "ERROR").await;

        let kind = get_kind("vpc_subnet").unwrap();
        let err = assert_err!(lifecycle(&server).create(kind.as_ref(), desired()).await);

        let msg = format!("{:#}", err);
        assert!(
            msg.contains("error waiting for the create operation of vpc_subnet (s-1) to complete"),
            "{}",
            msg
        );
        assert!(msg.contains("'ERROR'"), "{}", msg);
    }
}
