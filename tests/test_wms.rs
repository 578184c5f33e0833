mod common;

use common::*;
use mockito::Matcher;
use wmsdetect::{Crs, GeoRaster, GetMapRequest, MapService, TileBounds, WmsClient};

fn utm_request() -> GetMapRequest {
    let bbox = TileBounds::new(500000.0, 4600000.0, 500100.0, 4600100.0);
    let mut request = GetMapRequest::new("ortho", bbox);
    request.width = 32;
    request.height = 32;
    request
}

/// Client talking straight to the mock server, ignoring any proxy settings
fn local_client(server: &mockito::Server) -> anyhow::Result<WmsClient> {
    let http = reqwest::Client::builder().no_proxy().build()?;
    Ok(WmsClient::with_client(http, format!("{}/wms", server.url())))
}

#[tokio::test]
async fn test_get_map_sends_query_and_returns_body() -> anyhow::Result<()> {
    let request = utm_request();
    let tile = synthetic_raster(32, 32, &request.bbox, Some(Crs::UTM_33N))?.to_bytes()?;

    // 1. Server only answers the expected GetMap query
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/wms")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("SERVICE".into(), "WMS".into()),
            Matcher::UrlEncoded("VERSION".into(), "1.1.1".into()),
            Matcher::UrlEncoded("REQUEST".into(), "GetMap".into()),
            Matcher::UrlEncoded("LAYERS".into(), "ortho".into()),
            Matcher::UrlEncoded("STYLES".into(), "".into()),
            Matcher::UrlEncoded("SRS".into(), "EPSG:32633".into()),
            Matcher::UrlEncoded("BBOX".into(), "500000,4600000,500100,4600100".into()),
            Matcher::UrlEncoded("WIDTH".into(), "32".into()),
            Matcher::UrlEncoded("HEIGHT".into(), "32".into()),
            Matcher::UrlEncoded("FORMAT".into(), "image/geotiff".into()),
            Matcher::UrlEncoded("TRANSPARENT".into(), "TRUE".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "image/geotiff")
        .with_body(&tile)
        .create_async()
        .await;

    // 2. Body comes back untouched
    let client = local_client(&server)?;
    let body = client.get_map(&request).await?;
    mock.assert_async().await;
    assert_eq!(body, tile);

    // 3. And decodes as the requested tile
    let raster = GeoRaster::from_bytes(&body)?;
    assert_eq!(raster.crs, Some(Crs::UTM_33N));
    assert_eq!((raster.image.width(), raster.image.height()), (32, 32));

    Ok(())
}

#[tokio::test]
async fn test_http_error_status_carries_body() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/wms")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let client = local_client(&server)?;
    let err = client
        .get_map(&utm_request())
        .await
        .expect_err("HTTP 500 should be an error");
    mock.assert_async().await;

    let message = format!("{:#}", err);
    assert!(message.contains("500"), "unexpected error: {}", message);
    assert!(message.contains("boom"), "unexpected error: {}", message);

    Ok(())
}

#[tokio::test]
async fn test_xml_service_exception_is_rejected() -> anyhow::Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/wms")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/vnd.ogc.se_xml")
        .with_body("<ServiceException>Layer ortho is not defined</ServiceException>")
        .create_async()
        .await;

    let client = local_client(&server)?;
    let err = client
        .get_map(&utm_request())
        .await
        .expect_err("service exception should be an error");
    mock.assert_async().await;

    let message = format!("{:#}", err);
    assert!(message.contains("service exception"), "unexpected error: {}", message);
    assert!(message.contains("Layer ortho is not defined"));

    Ok(())
}

#[tokio::test]
async fn test_version_1_3_0_swaps_geographic_bbox() -> anyhow::Result<()> {
    let mut request = GetMapRequest::new("ortho", TileBounds::new(14.0, 50.0, 14.5, 50.5));
    request.srs = Crs::WGS84;
    request.version = "1.3.0".parse()?;

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/wms")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("VERSION".into(), "1.3.0".into()),
            Matcher::UrlEncoded("CRS".into(), "EPSG:4326".into()),
            Matcher::UrlEncoded("BBOX".into(), "50,14,50.5,14.5".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "image/tiff")
        .with_body([1u8, 2, 3, 4])
        .create_async()
        .await;

    let client = local_client(&server)?;
    let body = client.get_map(&request).await?;
    mock.assert_async().await;
    assert_eq!(body, vec![1, 2, 3, 4]);

    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() -> anyhow::Result<()> {
    // Nothing listens on the discard port
    let http = reqwest::Client::builder().no_proxy().build()?;
    let client = WmsClient::with_client(http, "http://127.0.0.1:9/wms");
    assert!(client.get_map(&utm_request()).await.is_err());

    Ok(())
}
