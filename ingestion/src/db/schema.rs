
diesel::table! {
    videos (id) {
        id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        title -> Text,
        description -> Nullable<Text>,
        thumbnail_url -> Nullable<Text>,
        video_url -> Nullable<Text>,
        user_id -> Uuid,
    }
}
