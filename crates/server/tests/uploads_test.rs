#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Multipart photo and tour image uploads.

mod common;

use axum::http::{Method, StatusCode};
use natours::models::Role;
use natours_test_utils::{assert, test_tour};

use common::{Part, body_json, multipart_request, png_bytes, run_test, shared_app};

fn stored(app: &common::TestApp, dir: &str, filename: &str) -> image::DynamicImage {
    let path = app.state.config().public_dir.join(dir).join(filename);
    assert_eq!(
        image::ImageFormat::from_path(&path).unwrap(),
        image::ImageFormat::Jpeg
    );
    image::open(&path).unwrap()
}

#[test]
fn photo_upload_is_resized_and_stored() {
    run_test(async {
        let app = shared_app().await;
        let account = app.account(Role::User).await;
        // Larger than the 10 KiB JSON limit.
        let png = png_bytes(120, 90);
        assert!(png.len() > 10 * 1024);

        let response = app
            .request(multipart_request(
                Method::PATCH,
                "/api/v1/users/update-me",
                Some(&account.token),
                &[
                    Part::Text("name", "Photo Owner"),
                    Part::File {
                        field: "photo",
                        filename: "me.png",
                        content_type: "image/png",
                        bytes: &png,
                    },
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;

        let user = &body["data"]["user"];
        assert_eq!(user["name"], "Photo Owner");
        let photo = user["photo"].as_str().unwrap();
        assert!(photo.starts_with(&format!("user-{}-", account.user.id)), "{photo}");
        assert!(photo.ends_with(".jpeg"));

        let img = stored(app, "img/users", photo);
        assert_eq!((img.width(), img.height()), (500, 500));
    });
}

#[test]
fn tour_images_are_stored() {
    run_test(async {
        let app = shared_app().await;
        let admin = app.account(Role::Admin).await;
        let tour_id = app.create_tour(test_tour("Pictured").to_json()).await;
        let png = png_bytes(60, 40);

        let response = app
            .request(multipart_request(
                Method::PATCH,
                &format!("/api/v1/tours/{tour_id}"),
                Some(&admin.token),
                &[
                    Part::Text("price", "555"),
                    Part::File {
                        field: "imageCover",
                        filename: "cover.png",
                        content_type: "image/png",
                        bytes: &png,
                    },
                    Part::File {
                        field: "images",
                        filename: "a.png",
                        content_type: "image/png",
                        bytes: &png,
                    },
                    Part::File {
                        field: "images",
                        filename: "b.png",
                        content_type: "image/png",
                        bytes: &png,
                    },
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let tour = &body["data"]["tour"];
        assert_eq!(tour["price"], 555.0);

        let cover = tour["imageCover"].as_str().unwrap();
        assert!(cover.starts_with(&format!("tour-{tour_id}-")), "{cover}");
        assert!(cover.ends_with("-cover.jpeg"));
        let img = stored(app, "img/tours", cover);
        assert_eq!((img.width(), img.height()), (2000, 1333));

        let images: Vec<&str> = tour["images"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("-1.jpeg") && images[1].ends_with("-2.jpeg"), "{images:?}");
        for name in images {
            stored(app, "img/tours", name);
        }

        app.cleanup_tour(tour_id).await;
    });
}

#[test]
fn non_image_uploads_are_rejected() {
    run_test(async {
        let app = shared_app().await;
        let account = app.account(Role::User).await;

        let response = app
            .request(multipart_request(
                Method::PATCH,
                "/api/v1/users/update-me",
                Some(&account.token),
                &[Part::File {
                    field: "photo",
                    filename: "notes.txt",
                    content_type: "text/plain",
                    bytes: b"not a picture",
                }],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert::fails_with(
            &body_json(response).await,
            "Please upload only image files (jpeg, png, jpg)",
        );
    });
}

#[test]
fn uploads_beyond_ten_mib_are_rejected() {
    run_test(async {
        let app = shared_app().await;
        let account = app.account(Role::User).await;
        let oversized = vec![0u8; 10 * 1024 * 1024 + 1024];

        let response = app
            .request(multipart_request(
                Method::PATCH,
                "/api/v1/users/update-me",
                Some(&account.token),
                &[Part::File {
                    field: "photo",
                    filename: "huge.png",
                    content_type: "image/png",
                    bytes: &oversized,
                }],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["status"], "fail");
    });
}
